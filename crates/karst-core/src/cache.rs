// karst-core/src/cache.rs

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use karst_abi::EngineDriver;

use crate::error::Result;
use crate::model::Model;

/// Global in-process cache of loaded models (no contexts).
static CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<Model>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn canon<P: AsRef<Path>>(p: P) -> PathBuf {
    std::fs::canonicalize(p.as_ref()).unwrap_or_else(|_| p.as_ref().to_path_buf())
}

/// Load the model through `driver` and keep it resident. Idempotent.
pub fn preload_model<P: AsRef<Path>>(driver: &dyn EngineDriver, model_path: P) -> Result<()> {
    let key = canon(&model_path);
    {
        // Fast path: already cached
        if CACHE.lock().unwrap().contains_key(&key) {
            return Ok(());
        }
    }

    let model = Model::load(driver, &key)?;

    // Insert into cache (keep Arc to keep resident)
    CACHE.lock().unwrap().insert(key, Arc::new(model));
    Ok(())
}

/// Get a cloned Arc to a cached model, if present.
pub fn get_cached_model<P: AsRef<Path>>(model_path: P) -> Option<Arc<Model>> {
    let key = canon(model_path);
    CACHE.lock().unwrap().get(&key).cloned()
}

/// Drop residency for a path. Outstanding Arcs keep the model alive.
pub fn evict_model<P: AsRef<Path>>(model_path: P) -> bool {
    let key = canon(model_path);
    CACHE.lock().unwrap().remove(&key).is_some()
}
