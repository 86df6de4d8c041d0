use std::path::Path;

use crate::batch::BatchRef;
use crate::chat::ChatTurn;
use crate::params::{ContextParams, Threadpool};
use crate::token::{Pos, SeqId, Token};

/// Raw decode status: success.
pub const DECODE_OK: i32 = 0;
/// Raw decode status: no free KV slot for the batch. A warning, not fatal —
/// engine state is unchanged; the caller shrinks the batch or grows the
/// context and retries.
pub const DECODE_NO_KV_SLOT: i32 = 1;

/// Loads model weights from disk and hands out engine handles.
///
/// Errors stay `String` at this seam: a driver may live across an ABI/process
/// boundary, and the facade layer re-wraps whatever comes back.
pub trait EngineDriver: Send + Sync {
    /// Fails if the file is missing, unreadable, or not a recognized weight
    /// format. On success the handle is fully initialized and read-only.
    fn load_model(&self, path: &Path) -> Result<Box<dyn ModelEngine>, String>;
}

/// Engine-side model handle. Immutable after load; safe to share read-only
/// across any number of contexts.
pub trait ModelEngine: Send + Sync {
    // ---- metadata reads (pure, always defined post-load) ----
    fn n_embd(&self) -> i32;
    fn n_ctx_train(&self) -> i32;
    fn token_bos(&self) -> Token;
    fn token_eos(&self) -> Token;
    fn token_eot(&self) -> Token;
    fn token_is_eog(&self, token: Token) -> bool;
    fn add_bos_token(&self) -> bool;
    fn add_eos_token(&self) -> bool;
    fn has_encoder(&self) -> bool;
    fn has_decoder(&self) -> bool;

    /// Native chat template string, if the model carries one.
    fn chat_template(&self) -> Option<String>;

    /// Render `turns` through `tmpl` (or the model's own template when `tmpl`
    /// is empty). `add_assistant` appends the assistant generation prompt.
    fn apply_chat_template(
        &self,
        tmpl: &str,
        turns: &[ChatTurn],
        add_assistant: bool,
    ) -> Result<String, String>;

    /// Deterministic, pure function of the vocabulary and the two flags.
    /// `add_special` prepends BOS per model convention; `parse_special`
    /// tokenizes control-token substrings as single special tokens instead of
    /// literal text.
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, String>;

    /// Inverse direction; round-trips with `tokenize` for ordinary tokens.
    /// `special` controls whether control tokens render their piece text.
    fn token_to_piece(&self, token: Token, special: bool) -> Result<String, String>;

    /// Allocate decode state sized per `params`. Fails if the requested
    /// context length is unsupported for this model.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn ContextEngine>, String>;
}

/// Engine-side decode session. One logical thread of control: the facade
/// serializes every call, and nothing here is reentrant.
pub trait ContextEngine {
    /// Context length fixed at construction.
    fn n_ctx(&self) -> u32;

    /// Rebind the compute pools used by subsequent decodes. Never called
    /// while a decode is in flight.
    fn attach_threadpool(&mut self, compute: &Threadpool, batch: &Threadpool);

    /// Submit one batch for forward evaluation. Returns `DECODE_OK`,
    /// `DECODE_NO_KV_SLOT` (state unchanged), or a negative fatal code after
    /// which the session state is unspecified until `reset`.
    fn decode(&mut self, batch: BatchRef<'_>) -> i32;

    /// Logits for the last output-flagged entry of the most recent decode.
    fn logits_last(&self) -> Option<Vec<f32>>;

    /// Pooled embedding row for a sequence. Defined only when the context was
    /// built with pooling enabled and the sequence has been decoded.
    fn embeddings_seq(&self, seq: SeqId) -> Option<Vec<f32>>;

    // ---- KV-cache region edits ----
    //
    // Interval convention shared by all three: p0 < 0 clamps to 0, p1 < 0
    // means "to infinity", otherwise half-open [p0, p1).

    /// Remove cached entries for `seq` in range. Returns false when the range
    /// overlaps a region the engine cannot edit; no partial removal may be
    /// assumed on that path. Removing from a never-decoded sequence is a
    /// successful no-op.
    fn kv_seq_rm(&mut self, seq: SeqId, p0: Pos, p1: Pos) -> bool;

    /// Shift stored positions by `delta` for cached entries of `seq` in
    /// range. RoPE-dependent data may be updated lazily on the next decode.
    fn kv_seq_add(&mut self, seq: SeqId, p0: Pos, p1: Pos, delta: Pos);

    /// Integer-divide stored positions by `d` (caller guarantees `d > 1`).
    /// Same lazy-update caveat as `kv_seq_add`.
    fn kv_seq_div(&mut self, seq: SeqId, p0: Pos, p1: Pos, d: Pos);

    /// Serialize full decode state plus `tokens` to a session file. The blob
    /// format is owned by the engine. Returns false on I/O failure.
    fn save_state_file(&self, path: &Path, tokens: &[Token]) -> bool;

    /// Clear all KV content and pending lazy updates without reallocating.
    fn reset(&mut self);
}
