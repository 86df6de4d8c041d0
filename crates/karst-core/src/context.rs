// karst-core/src/context.rs
//
// Borrowed context tied to a model's lifetime. All mutation lives here; the
// `Model` itself is immutable and Sync once loaded. The facade owns the
// session state machine: Ready → Ready on success/warning/cache edit,
// Ready → Unusable on a fatal decode, Unusable → Ready only through reset().

use std::path::Path;

use karst_abi::{
    ContextEngine, EmbeddingNorm, PoolingType, Pos, SeqId, Threadpool, Token, DECODE_NO_KV_SLOT,
    DECODE_OK,
};

use crate::batch::Batch;
use crate::debug;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::params::GptParams;

/// Non-fatal decode outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    /// No free KV slot for the batch. Engine state is unchanged; shrink the
    /// batch or enlarge the context and retry.
    NoKvSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    Unusable,
}

/// One decode session bound to a `Model`.
///
/// Not reentrant: every mutating call takes `&mut self`, so a decode
/// concurrent with another decode or a cache edit on the same context cannot
/// compile without an external lock. Internal engine parallelism through the
/// attached pools is opaque to this layer.
pub struct Context<'a> {
    model: &'a Model,
    engine: Box<dyn ContextEngine>,
    pooling: PoolingType,
    state: SessionState,
    /// Active context window recorded at construction.
    n_ctx: u32,
}

impl<'a> Context<'a> {
    /// Allocate decode state sized per `params`. The params object is copied
    /// by value here; mutating it afterwards does not affect this context.
    pub fn new(model: &'a Model, params: &GptParams) -> Result<Self> {
        let cp = params.to_context_params();
        let engine = model
            .engine()
            .new_context(&cp)
            .map_err(Error::ContextInit)?;
        let n_ctx = engine.n_ctx();
        Ok(Self {
            model,
            engine,
            pooling: cp.pooling,
            state: SessionState::Ready,
            n_ctx,
        })
    }

    #[inline]
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// Configured context length; constant for this context's lifetime.
    #[inline]
    pub fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    #[inline]
    pub fn pooling_type(&self) -> PoolingType {
        self.pooling
    }

    /// Rebind the compute pools used by subsequent decodes. Safe between
    /// decodes; `&mut self` keeps it out of any in-flight decode.
    pub fn attach_threadpool(&mut self, compute: &Threadpool, batch: &Threadpool) {
        self.engine.attach_threadpool(compute, batch);
    }

    fn guard_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Unusable => Err(Error::NeedsReset),
        }
    }

    /// Submit one batch for forward evaluation.
    ///
    /// `Ok(DecodeStatus::NoKvSlot)` is a warning: state is unchanged and the
    /// call may be retried with a smaller batch. A fatal engine code flips
    /// the context to unusable; only `reset` recovers it.
    pub fn decode(&mut self, batch: &Batch) -> Result<DecodeStatus> {
        self.guard_ready()?;
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }
        debug::dump_batch("decode", batch.as_ref());

        match self.engine.decode(batch.as_ref()) {
            DECODE_OK => Ok(DecodeStatus::Ok),
            c if c >= DECODE_NO_KV_SLOT => Ok(DecodeStatus::NoKvSlot),
            code => {
                self.state = SessionState::Unusable;
                Err(Error::Decode { code })
            }
        }
    }

    /// Decode plus pooled-embedding extraction: one row of `n_embd` floats
    /// per sequence `0..n_seq`, normalized per `norm`, written into `out`.
    /// Requires a pooling type other than `None`. Rows are written only when
    /// the decode itself succeeds.
    pub fn decode_embeddings(
        &mut self,
        batch: &Batch,
        out: &mut [f32],
        n_seq: usize,
        n_embd: usize,
        norm: EmbeddingNorm,
    ) -> Result<DecodeStatus> {
        if matches!(self.pooling, PoolingType::None) {
            return Err(Error::PoolingRequired);
        }
        let needed = n_seq * n_embd;
        if out.len() < needed {
            return Err(Error::OutputTooSmall {
                needed,
                got: out.len(),
            });
        }

        let status = self.decode(batch)?;
        if status != DecodeStatus::Ok {
            return Ok(status);
        }

        for seq in 0..n_seq {
            let row = self
                .engine
                .embeddings_seq(seq as SeqId)
                .ok_or_else(|| Error::Engine(format!("no pooled embedding for seq {seq}")))?;
            if row.len() < n_embd {
                return Err(Error::Engine(format!(
                    "engine returned {} floats for seq {seq}, expected {n_embd}",
                    row.len()
                )));
            }
            let dst = &mut out[seq * n_embd..(seq + 1) * n_embd];
            dst.copy_from_slice(&row[..n_embd]);
            normalize_row(dst, norm);
        }
        Ok(DecodeStatus::Ok)
    }

    /// Logits for the last output-flagged entry of the most recent decode.
    pub fn logits(&self) -> Option<Vec<f32>> {
        self.engine.logits_last()
    }

    /// Pooled embedding row for one sequence, unnormalized. `None` when
    /// pooling is disabled or the sequence has not been decoded. After a
    /// position edit, do not read this until the next decode completes.
    pub fn embeddings_seq(&self, seq: SeqId) -> Option<Vec<f32>> {
        self.engine.embeddings_seq(seq)
    }

    // ---- KV-cache region edits ----
    //
    // Shared interval convention: p0 < 0 clamps to 0, p1 < 0 means
    // "to infinity", otherwise half-open [p0, p1).

    /// Remove cached entries for `seq` within `[p0, p1)`. `Ok(false)` means
    /// the engine could not fully apply the removal (e.g. the range overlaps
    /// a prefix shared via embedding mode); no partial removal occurred.
    /// Removing from a never-decoded sequence is a successful no-op.
    pub fn kv_cache_seq_rm(&mut self, seq: SeqId, p0: Pos, p1: Pos) -> Result<bool> {
        self.guard_ready()?;
        debug::trace_kv("rm", seq, p0, p1, 0);
        Ok(self.engine.kv_seq_rm(seq, p0, p1))
    }

    /// Shift stored positions by `delta` for cached entries of `seq` in
    /// range; slides a window forward without recomputing attention for
    /// retained tokens. RoPE-dependent data may update lazily on the next
    /// decode, so position-dependent output must not be read before that
    /// decode completes.
    pub fn kv_cache_seq_add(&mut self, seq: SeqId, p0: Pos, p1: Pos, delta: Pos) -> Result<()> {
        self.guard_ready()?;
        debug::trace_kv("add", seq, p0, p1, delta);
        self.engine.kv_seq_add(seq, p0, p1, delta);
        Ok(())
    }

    /// Integer-divide stored positions by `d > 1` for cached entries of
    /// `seq` in range. Same lazy-update caveat as `kv_cache_seq_add`.
    pub fn kv_cache_seq_div(&mut self, seq: SeqId, p0: Pos, p1: Pos, d: Pos) -> Result<()> {
        self.guard_ready()?;
        if d <= 1 {
            return Err(Error::InvalidDivisor { d });
        }
        debug::trace_kv("div", seq, p0, p1, d);
        self.engine.kv_seq_div(seq, p0, p1, d);
        Ok(())
    }

    // ---- tokenizer convenience (delegates to the bound model) ----

    pub fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>> {
        self.model.tokenize(text, add_special, parse_special)
    }

    pub fn token_to_piece(&self, token: Token) -> Result<String> {
        self.model.token_to_piece(token)
    }

    pub fn token_to_piece_special(&self, token: Token) -> Result<String> {
        self.model.token_to_piece_special(token)
    }

    // ---- persistence ----

    /// Serialize full decode state plus `tokens` to a session file. The blob
    /// format is owned by the engine; this layer forwards the path and token
    /// history and reports success. `Ok(false)` is an I/O failure with
    /// in-memory state untouched.
    pub fn save_state_file<P: AsRef<Path>>(&self, path: P, tokens: &[Token]) -> Result<bool> {
        self.guard_ready()?;
        Ok(self.engine.save_state_file(path.as_ref(), tokens))
    }

    /// Clear all KV content and pending lazy position updates, returning the
    /// context to a freshly-created state without reallocating. The only way
    /// out of the unusable state; idempotent otherwise.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.state = SessionState::Ready;
    }
}

fn normalize_row(row: &mut [f32], norm: EmbeddingNorm) {
    match norm {
        EmbeddingNorm::None => {}
        EmbeddingNorm::MaxAbs => {
            let max = row.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            if max > 0.0 {
                for v in row.iter_mut() {
                    *v /= max;
                }
            }
        }
        EmbeddingNorm::L2 => {
            let sum: f32 = row.iter().map(|v| v * v).sum();
            let len = sum.sqrt();
            if len > 0.0 {
                for v in row.iter_mut() {
                    *v /= len;
                }
            }
        }
    }
}
