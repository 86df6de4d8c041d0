// karst-core/src/batch.rs
//
// Decode request builder.
// - Capacity fixed at construction; appends past it are a capacity error.
// - Structure-of-arrays storage, lent to the engine as a `BatchRef`.
// - Safe to reuse via `clear()`; reusing with stale position data is the
//   caller's hazard (relative positions go wrong, the builder cannot tell).

use karst_abi::{BatchRef, Pos, SeqId, Token};

use crate::error::{Error, Result};

/// One decode request: an ordered run of (token, position, sequence id,
/// wants-output) tuples submitted together.
///
/// Entries sharing a sequence id must use strictly increasing positions for
/// cache consistency. The builder does not validate this — the engine's
/// behavior on violation is engine-defined, not crash-safe.
pub struct Batch {
    token: Vec<Token>,
    pos: Vec<Pos>,
    seq_id: Vec<SeqId>,
    output: Vec<bool>,
    capacity: usize,
}

impl Batch {
    /// Create a batch with room for `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            token: Vec::with_capacity(capacity),
            pos: Vec::with_capacity(capacity),
            seq_id: Vec::with_capacity(capacity),
            output: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one entry. `wants_output` requests logits/embeddings for this
    /// position.
    pub fn add(&mut self, token: Token, pos: Pos, seq_id: SeqId, wants_output: bool) -> Result<()> {
        if self.token.len() == self.capacity {
            return Err(Error::BatchCapacity {
                capacity: self.capacity,
            });
        }
        self.token.push(token);
        self.pos.push(pos);
        self.seq_id.push(seq_id);
        self.output.push(wants_output);
        Ok(())
    }

    /// Append a token run for one sequence at positions `n_past..`, optionally
    /// flagging only the final entry for output.
    pub fn add_sequence(
        &mut self,
        tokens: &[Token],
        seq_id: SeqId,
        n_past: Pos,
        want_output_last: bool,
    ) -> Result<()> {
        for (i, token) in tokens.iter().enumerate() {
            let last = i + 1 == tokens.len();
            self.add(
                *token,
                n_past + i as Pos,
                seq_id,
                want_output_last && last,
            )?;
        }
        Ok(())
    }

    /// Ensure only the last entry is flagged for output.
    /// Safe to call after a series of `add()` calls.
    pub fn mark_last_for_output(&mut self) {
        for flag in self.output.iter_mut() {
            *flag = false;
        }
        if let Some(last) = self.output.last_mut() {
            *last = true;
        }
    }

    /// Reset the batch so it can be rebuilt for the next decode.
    pub fn clear(&mut self) {
        self.token.clear();
        self.pos.clear();
        self.seq_id.clear();
        self.output.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.token.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Borrowed view handed to the engine.
    pub fn as_ref(&self) -> BatchRef<'_> {
        BatchRef {
            token: &self.token,
            pos: &self.pos,
            seq_id: &self.seq_id,
            output: &self.output,
        }
    }
}
