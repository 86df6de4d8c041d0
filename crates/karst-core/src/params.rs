// karst-core/src/params.rs
//
// High-level parameter structs + conversion into the engine's ContextParams.
// Plain mutable value containers: they are copied by value at construction
// time and have no identity beyond that point — mutating them afterwards does
// not touch any live Model or Context.

use karst_abi::{ContextParams, PoolingType};

// =========================
// CONTEXT / RUNTIME PARAMS
// =========================

#[derive(Debug, Clone)]
pub struct GptParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_seq_max: u32,
    /// 0 resolves to the host core count at conversion time.
    pub n_threads: i32,
    pub n_threads_batch: i32,
    pub pooling: PoolingType,
    pub embeddings: bool,

    // generation limits (carried for callers; not consumed by this layer)
    pub n_predict: i32,
    pub n_keep: i32,
}

impl Default for GptParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_batch: 512,
            n_ubatch: 4,
            n_seq_max: 1, // single sequence by default
            n_threads: 0,
            n_threads_batch: 0,
            pooling: PoolingType::Unspecified,
            embeddings: false,
            n_predict: -1,
            n_keep: 0,
        }
    }
}

impl GptParams {
    /// Build the engine-side copy. `n_threads == 0` resolves to the host core
    /// count here so the engine never sees a placeholder.
    pub fn to_context_params(&self) -> ContextParams {
        let cores = num_cpus::get().max(1) as i32;
        let threads = if self.n_threads > 0 {
            self.n_threads
        } else {
            cores
        };
        let threads_batch = if self.n_threads_batch > 0 {
            self.n_threads_batch
        } else {
            threads
        };

        ContextParams {
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
            n_ubatch: self.n_ubatch,
            n_seq_max: self.n_seq_max.max(1),
            n_threads: threads,
            n_threads_batch: threads_batch,
            pooling: self.pooling,
            embeddings: self.embeddings,
        }
    }
}

// =========================
// SAMPLING PARAMS
// =========================
//
// Carried through to engine construction for advanced callers; no sampling is
// performed in this layer.

#[derive(Debug, Clone)]
pub struct SamplerParams {
    pub seed: u32,
    pub greedy: bool,             // if true, argmax; ignore other knobs
    pub temperature: Option<f32>, // > 0.0
    pub top_k: Option<u32>,       // >= 1
    pub top_p: Option<f32>,       // (0,1]
    pub min_p: Option<f32>,       // [0,1)
    pub typical: Option<f32>,     // (0,1]
    pub penalties: Option<PenaltyParams>,
    pub mirostat: Option<MirostatParams>,
}

#[derive(Debug, Clone)]
pub struct PenaltyParams {
    pub last_n: i32,
    pub repeat: f32,
    pub freq: f32,
    pub presence: f32,
}

#[derive(Debug, Clone)]
pub struct MirostatParams {
    pub version: u8, // 1 or 2
    pub tau: f32,
    pub eta: f32,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            seed: 0,
            greedy: false,
            temperature: Some(0.8),
            top_k: Some(40),
            top_p: Some(0.95),
            min_p: Some(0.05),
            typical: None,
            penalties: Some(PenaltyParams {
                last_n: 64,
                repeat: 1.1,
                freq: 0.0,
                presence: 0.0,
            }),
            mirostat: None,
        }
    }
}
