// karst-sim/src/model.rs

use std::path::Path;

use serde::{Deserialize, Serialize};

use karst_abi::{ChatTurn, ContextEngine, ContextParams, EngineDriver, ModelEngine, Role, Token};

use crate::context::SimContext;
use crate::vocab;

/// On-disk "weight" format for the simulator: a small JSON spec. Anything
/// else is rejected at load time, modeling an unrecognized weight file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimModelSpec {
    pub name: String,
    #[serde(default = "default_n_embd")]
    pub n_embd: i32,
    #[serde(default = "default_n_ctx_train")]
    pub n_ctx_train: i32,
    #[serde(default)]
    pub chat_template: Option<String>,
}

fn default_n_embd() -> i32 {
    8
}

fn default_n_ctx_train() -> i32 {
    2048
}

impl Default for SimModelSpec {
    fn default() -> Self {
        Self {
            name: "karst-sim".to_string(),
            n_embd: default_n_embd(),
            n_ctx_train: default_n_ctx_train(),
            chat_template: None,
        }
    }
}

impl SimModelSpec {
    /// Write the spec as a loadable model file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Driver handing out simulator models.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimDriver;

impl EngineDriver for SimDriver {
    fn load_model(&self, path: &Path) -> Result<Box<dyn ModelEngine>, String> {
        let bytes =
            std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let spec: SimModelSpec = serde_json::from_slice(&bytes)
            .map_err(|e| format!("{} is not a karst-sim model file: {e}", path.display()))?;
        if spec.n_embd <= 0 || spec.n_ctx_train <= 0 {
            return Err(format!(
                "{}: n_embd and n_ctx_train must be positive",
                path.display()
            ));
        }
        Ok(Box::new(SimModel { spec }))
    }
}

/// Loaded simulator model. Immutable; all decode state lives in
/// `SimContext`.
pub struct SimModel {
    spec: SimModelSpec,
}

const BUILTIN_TEMPLATE: &str = "chatml";

impl ModelEngine for SimModel {
    fn n_embd(&self) -> i32 {
        self.spec.n_embd
    }

    fn n_ctx_train(&self) -> i32 {
        self.spec.n_ctx_train
    }

    fn token_bos(&self) -> Token {
        vocab::TOKEN_BOS
    }

    fn token_eos(&self) -> Token {
        vocab::TOKEN_EOS
    }

    fn token_eot(&self) -> Token {
        vocab::TOKEN_EOT
    }

    fn token_is_eog(&self, token: Token) -> bool {
        vocab::is_eog(token)
    }

    fn add_bos_token(&self) -> bool {
        true
    }

    fn add_eos_token(&self) -> bool {
        false
    }

    fn has_encoder(&self) -> bool {
        false
    }

    fn has_decoder(&self) -> bool {
        true
    }

    fn chat_template(&self) -> Option<String> {
        Some(
            self.spec
                .chat_template
                .clone()
                .unwrap_or_else(|| BUILTIN_TEMPLATE.to_string()),
        )
    }

    fn apply_chat_template(
        &self,
        tmpl: &str,
        turns: &[ChatTurn],
        add_assistant: bool,
    ) -> Result<String, String> {
        let name = if tmpl.is_empty() {
            self.chat_template().unwrap_or_default()
        } else {
            tmpl.to_string()
        };
        if name != BUILTIN_TEMPLATE {
            return Err(format!("unknown chat template '{name}'"));
        }

        let mut out = String::new();
        for turn in turns {
            let role = match turn.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str(&format!("<|{role}|>{}{}\n", turn.content, vocab::PIECE_EOT));
        }
        if add_assistant {
            out.push_str("<|assistant|>");
        }
        Ok(out)
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, String> {
        Ok(vocab::tokenize(text, add_special, parse_special))
    }

    fn token_to_piece(&self, token: Token, special: bool) -> Result<String, String> {
        vocab::token_to_piece(token, special)
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn ContextEngine>, String> {
        if params.n_ctx == 0 {
            return Err("n_ctx must be > 0".to_string());
        }
        if params.n_ctx > self.spec.n_ctx_train as u32 {
            return Err(format!(
                "n_ctx {} exceeds the supported maximum {} for this model",
                params.n_ctx, self.spec.n_ctx_train
            ));
        }
        Ok(Box::new(SimContext::new(params, self.spec.n_embd as usize)))
    }
}
