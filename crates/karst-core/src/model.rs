// karst-core/src/model.rs

use std::path::Path;

use karst_abi::{ChatTurn, EngineDriver, ModelEngine, Token};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::params::GptParams;

/// Safe wrapper around an engine model handle.
///
/// Immutable after load. Every `Context` borrows its `Model`, so the borrow
/// checker enforces that the model outlives all dependent contexts.
pub struct Model {
    engine: Box<dyn ModelEngine>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").finish_non_exhaustive()
    }
}

impl Model {
    /// Load weights from disk through `driver`. Fails with no partial object
    /// if the file is missing, unreadable, or not a recognized format.
    pub fn load<P: AsRef<Path>>(driver: &dyn EngineDriver, path: P) -> Result<Self> {
        let engine = driver.load_model(path.as_ref()).map_err(Error::Load)?;
        Ok(Self { engine })
    }

    /// Wrap an already-loaded engine handle.
    pub fn from_engine(engine: Box<dyn ModelEngine>) -> Self {
        Self { engine }
    }

    /// Create a decode session bound to this model. The context borrows
    /// `self` and never owns it.
    pub fn new_context(&self, params: &GptParams) -> Result<Context<'_>> {
        Context::new(self, params)
    }

    #[inline]
    pub(crate) fn engine(&self) -> &dyn ModelEngine {
        &*self.engine
    }

    // ---- metadata reads ----

    /// Embedding dimension (n_embd).
    #[inline]
    pub fn n_embd(&self) -> i32 {
        self.engine.n_embd()
    }

    /// Context length the model was trained with.
    #[inline]
    pub fn n_ctx_train(&self) -> i32 {
        self.engine.n_ctx_train()
    }

    #[inline]
    pub fn token_bos(&self) -> Token {
        self.engine.token_bos()
    }

    #[inline]
    pub fn token_eos(&self) -> Token {
        self.engine.token_eos()
    }

    #[inline]
    pub fn token_eot(&self) -> Token {
        self.engine.token_eot()
    }

    /// True for any end-of-generation token (EOS, EOT, ...).
    #[inline]
    pub fn token_is_eog(&self, token: Token) -> bool {
        self.engine.token_is_eog(token)
    }

    #[inline]
    pub fn add_bos_token(&self) -> bool {
        self.engine.add_bos_token()
    }

    #[inline]
    pub fn add_eos_token(&self) -> bool {
        self.engine.add_eos_token()
    }

    #[inline]
    pub fn has_encoder(&self) -> bool {
        self.engine.has_encoder()
    }

    #[inline]
    pub fn has_decoder(&self) -> bool {
        self.engine.has_decoder()
    }

    /// Native chat template string, if present in the model.
    pub fn chat_template(&self) -> Option<String> {
        self.engine.chat_template()
    }

    // ---- tokenizer entry points ----

    /// Tokenize `text`. `add_special` prepends BOS per model convention;
    /// `parse_special` turns control-token substrings into single tokens.
    pub fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>> {
        self.engine
            .tokenize(text, add_special, parse_special)
            .map_err(Error::Engine)
    }

    /// Render a token as its text piece. Control tokens render empty here;
    /// use `token_to_piece_special` to see their piece text.
    pub fn token_to_piece(&self, token: Token) -> Result<String> {
        self.engine
            .token_to_piece(token, false)
            .map_err(Error::Engine)
    }

    /// Like `token_to_piece`, but control tokens render their piece text.
    pub fn token_to_piece_special(&self, token: Token) -> Result<String> {
        self.engine
            .token_to_piece(token, true)
            .map_err(Error::Engine)
    }

    /// Render `tmpl` against a fixed example conversation. Pure function of
    /// the model's template machinery plus the input string.
    pub fn format_example(&self, tmpl: &str) -> Result<String> {
        let turns = [
            ChatTurn::system("You are a helpful assistant"),
            ChatTurn::user("Hello"),
            ChatTurn::assistant("Hi there"),
            ChatTurn::user("How are you?"),
        ];
        self.engine
            .apply_chat_template(tmpl, &turns, true)
            .map_err(Error::Engine)
    }
}
