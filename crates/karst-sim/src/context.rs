// karst-sim/src/context.rs
//
// Slot-accounted KV bookkeeping behind the ContextEngine contract.
// - One cell per decoded token, tagged (token, position), grouped by seq id.
// - A global slot budget of n_ctx cells across all sequences; a batch that
//   does not fit returns the no-KV-slot warning without touching state.
// - Outputs are deterministic functions of (token, stored position, seq), so
//   position edits are observable through decode outputs.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use karst_abi::{
    BatchRef, ContextEngine, ContextParams, PoolingType, Pos, SeqId, Threadpool, Token,
    DECODE_NO_KV_SLOT, DECODE_OK,
};

const FATAL_MALFORMED: i32 = -1;

/// Logits width handed back for flagged entries. Synthetic; real engines use
/// their vocab size here.
pub const LOGITS_DIM: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Cell {
    token: Token,
    pos: Pos,
}

pub struct SimContext {
    n_ctx: u32,
    n_embd: usize,
    pooling: PoolingType,
    embeddings: bool,

    cells: HashMap<SeqId, Vec<Cell>>,
    /// Per-seq prefix end below which removal is refused (prefix shared via
    /// embedding mode). Set once, by the first decoded batch.
    pinned: HashMap<SeqId, Pos>,
    first_batch_done: bool,

    last_logits: Option<Vec<f32>>,
    /// Models the RoPE lazy-update window between a position edit and the
    /// next decode.
    pending_update: bool,

    pools: Option<(Threadpool, Threadpool)>,
}

impl SimContext {
    pub fn new(params: &ContextParams, n_embd: usize) -> Self {
        Self {
            n_ctx: params.n_ctx,
            n_embd,
            pooling: params.pooling,
            embeddings: params.embeddings,
            cells: HashMap::new(),
            pinned: HashMap::new(),
            first_batch_done: false,
            last_logits: None,
            pending_update: false,
            pools: None,
        }
    }

    fn used_slots(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// True while a position edit has not yet been flushed by a decode.
    pub fn has_pending_update(&self) -> bool {
        self.pending_update
    }

    /// Pools last attached via `attach_threadpool`.
    pub fn threadpools(&self) -> Option<(Threadpool, Threadpool)> {
        self.pools
    }
}

/// Clamp the shared interval convention: p0 < 0 → 0, p1 < 0 → ∞.
fn clamp(p0: Pos, p1: Pos) -> (Pos, Pos) {
    let lo = if p0 < 0 { 0 } else { p0 };
    let hi = if p1 < 0 { Pos::MAX } else { p1 };
    (lo, hi)
}

impl ContextEngine for SimContext {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn attach_threadpool(&mut self, compute: &Threadpool, batch: &Threadpool) {
        self.pools = Some((*compute, *batch));
    }

    fn decode(&mut self, batch: BatchRef<'_>) -> i32 {
        if batch.is_empty() {
            return FATAL_MALFORMED;
        }
        for i in 0..batch.len() {
            if batch.pos[i] < 0 || batch.token[i].0 < 0 {
                return FATAL_MALFORMED;
            }
        }
        if self.used_slots() + batch.len() > self.n_ctx as usize {
            // state untouched on this path
            return DECODE_NO_KV_SLOT;
        }

        for i in 0..batch.len() {
            self.cells.entry(batch.seq_id[i]).or_default().push(Cell {
                token: batch.token[i],
                pos: batch.pos[i],
            });
        }

        // Embedding mode shares the first decoded prefix across readers;
        // that region refuses later removal.
        if self.embeddings && !self.first_batch_done {
            for i in 0..batch.len() {
                let end = batch.pos[i] + 1;
                let pin = self.pinned.entry(batch.seq_id[i]).or_insert(end);
                if end > *pin {
                    *pin = end;
                }
            }
        }
        self.first_batch_done = true;

        self.last_logits = batch
            .output
            .iter()
            .rposition(|&f| f)
            .map(|i| synth_logits(batch.token[i], batch.pos[i], batch.seq_id[i]));

        self.pending_update = false;
        DECODE_OK
    }

    fn logits_last(&self) -> Option<Vec<f32>> {
        self.last_logits.clone()
    }

    fn embeddings_seq(&self, seq: SeqId) -> Option<Vec<f32>> {
        if matches!(self.pooling, PoolingType::None) {
            return None;
        }
        let cells = self.cells.get(&seq)?;
        if cells.is_empty() {
            return None;
        }

        let row_of = |cell: &Cell| -> Vec<f32> {
            (0..self.n_embd)
                .map(|dim| feature(cell.token, cell.pos, seq, dim))
                .collect()
        };

        // Unspecified resolves to the model default (mean) here.
        Some(match self.pooling {
            PoolingType::Cls => row_of(&cells[0]),
            PoolingType::Last | PoolingType::Rank => row_of(cells.last().unwrap()),
            _ => {
                let mut acc = vec![0.0f32; self.n_embd];
                for cell in cells {
                    for (a, v) in acc.iter_mut().zip(row_of(cell)) {
                        *a += v;
                    }
                }
                let n = cells.len() as f32;
                for a in acc.iter_mut() {
                    *a /= n;
                }
                acc
            }
        })
    }

    fn kv_seq_rm(&mut self, seq: SeqId, p0: Pos, p1: Pos) -> bool {
        let (lo, hi) = clamp(p0, p1);
        let Some(cells) = self.cells.get_mut(&seq) else {
            // never-decoded sequence: successful no-op
            return true;
        };
        if let Some(&pin) = self.pinned.get(&seq) {
            if lo < pin && cells.iter().any(|c| c.pos >= lo && c.pos < hi.min(pin)) {
                // would clip the shared prefix; nothing is removed
                return false;
            }
        }
        cells.retain(|c| c.pos < lo || c.pos >= hi);
        true
    }

    fn kv_seq_add(&mut self, seq: SeqId, p0: Pos, p1: Pos, delta: Pos) {
        let (lo, hi) = clamp(p0, p1);
        if let Some(cells) = self.cells.get_mut(&seq) {
            for cell in cells.iter_mut() {
                if cell.pos >= lo && cell.pos < hi {
                    cell.pos += delta;
                }
            }
            // cells shifted below zero fall out of the cache
            cells.retain(|c| c.pos >= 0);
            self.pending_update = true;
        }
    }

    fn kv_seq_div(&mut self, seq: SeqId, p0: Pos, p1: Pos, d: Pos) {
        let (lo, hi) = clamp(p0, p1);
        if let Some(cells) = self.cells.get_mut(&seq) {
            for cell in cells.iter_mut() {
                if cell.pos >= lo && cell.pos < hi {
                    cell.pos /= d;
                }
            }
            self.pending_update = true;
        }
    }

    fn save_state_file(&self, path: &Path, tokens: &[Token]) -> bool {
        #[derive(Serialize)]
        struct SavedState {
            n_ctx: u32,
            sequences: Vec<(SeqId, Vec<(i32, Pos)>)>,
            tokens: Vec<i32>,
        }

        let mut sequences: Vec<(SeqId, Vec<(i32, Pos)>)> = self
            .cells
            .iter()
            .map(|(seq, cells)| (*seq, cells.iter().map(|c| (c.token.0, c.pos)).collect()))
            .collect();
        sequences.sort_by_key(|(seq, _)| *seq);

        let state = SavedState {
            n_ctx: self.n_ctx,
            sequences,
            tokens: tokens.iter().map(|t| t.0).collect(),
        };

        let Ok(blob) = serde_json::to_vec(&state) else {
            return false;
        };
        std::fs::write(path, blob).is_ok()
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.pinned.clear();
        self.first_batch_done = false;
        self.last_logits = None;
        self.pending_update = false;
    }
}

/// Deterministic per-cell feature. splitmix64 over the cell identity, folded
/// into [-1, 1).
fn feature(token: Token, pos: Pos, seq: SeqId, dim: usize) -> f32 {
    let x = (token.0 as u64)
        ^ (pos as u64).rotate_left(17)
        ^ (seq as u64).rotate_left(31)
        ^ (dim as u64).rotate_left(47);
    ((splitmix64(x) % 2048) as f32) / 1024.0 - 1.0
}

fn synth_logits(token: Token, pos: Pos, seq: SeqId) -> Vec<f32> {
    (0..LOGITS_DIM)
        .map(|dim| feature(token, pos, seq, dim))
        .collect()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_ctx: u32, pooling: PoolingType, embeddings: bool) -> ContextParams {
        ContextParams {
            n_ctx,
            n_batch: 512,
            n_ubatch: 4,
            n_seq_max: 4,
            n_threads: 1,
            n_threads_batch: 1,
            pooling,
            embeddings,
        }
    }

    fn batch_of<'a>(
        tokens: &'a [Token],
        pos: &'a [Pos],
        seq: &'a [SeqId],
        output: &'a [bool],
    ) -> BatchRef<'a> {
        BatchRef {
            token: tokens,
            pos,
            seq_id: seq,
            output,
        }
    }

    #[test]
    fn slot_budget_is_global_across_sequences() {
        let mut ctx = SimContext::new(&params(4, PoolingType::Unspecified, false), 8);

        let rc = ctx.decode(batch_of(
            &[Token(10), Token(11), Token(12)],
            &[0, 1, 2],
            &[0, 0, 0],
            &[false, false, true],
        ));
        assert_eq!(rc, DECODE_OK);

        // only one slot left; a two-token batch on another seq must warn
        let rc = ctx.decode(batch_of(
            &[Token(20), Token(21)],
            &[0, 1],
            &[1, 1],
            &[false, true],
        ));
        assert_eq!(rc, DECODE_NO_KV_SLOT);
        // warning path leaves state untouched
        assert_eq!(ctx.used_slots(), 3);
    }

    #[test]
    fn malformed_batches_are_fatal() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Unspecified, false), 8);
        let rc = ctx.decode(batch_of(&[Token(5)], &[-3], &[0], &[true]));
        assert_eq!(rc, FATAL_MALFORMED);
        let rc = ctx.decode(batch_of(&[], &[], &[], &[]));
        assert_eq!(rc, FATAL_MALFORMED);
    }

    #[test]
    fn rm_clamps_open_ended_intervals() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Unspecified, false), 8);
        ctx.decode(batch_of(
            &[Token(1), Token(2), Token(3), Token(4)],
            &[0, 1, 2, 3],
            &[0, 0, 0, 0],
            &[false, false, false, true],
        ));

        // p0 < 0 clamps to 0, p1 = 2 keeps [2, 3]
        assert!(ctx.kv_seq_rm(0, -1, 2));
        assert_eq!(ctx.used_slots(), 2);

        // p1 < 0 removes to infinity
        assert!(ctx.kv_seq_rm(0, 0, -1));
        assert_eq!(ctx.used_slots(), 0);
    }

    #[test]
    fn rm_refuses_to_clip_the_pinned_prefix() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Mean, true), 8);
        ctx.decode(batch_of(
            &[Token(1), Token(2)],
            &[0, 1],
            &[0, 0],
            &[false, true],
        ));
        // follow-up tokens are not part of the shared prefix
        ctx.decode(batch_of(&[Token(3)], &[2], &[0], &[true]));

        assert!(!ctx.kv_seq_rm(0, 0, -1));
        assert_eq!(ctx.used_slots(), 3, "no partial removal");

        // past the pin is editable
        assert!(ctx.kv_seq_rm(0, 2, -1));
        assert_eq!(ctx.used_slots(), 2);
    }

    #[test]
    fn add_shift_below_zero_drops_cells() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Unspecified, false), 8);
        ctx.decode(batch_of(
            &[Token(1), Token(2), Token(3)],
            &[0, 1, 2],
            &[0, 0, 0],
            &[false, false, true],
        ));
        ctx.kv_seq_add(0, 0, -1, -2);
        assert_eq!(ctx.used_slots(), 1);
        assert!(ctx.has_pending_update());
    }

    #[test]
    fn div_rewrites_positions_in_range() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Last, false), 4);
        ctx.decode(batch_of(&[Token(9)], &[8], &[0], &[true]));
        let before = ctx.embeddings_seq(0).unwrap();

        ctx.kv_seq_div(0, 0, -1, 4);
        let after = ctx.embeddings_seq(0).unwrap();
        assert_ne!(before, after, "position change must show in the output");

        // dividing the now-position-2 cell by 2 equals a fresh pos-1 cell
        ctx.kv_seq_div(0, 0, -1, 2);
        let mut fresh = SimContext::new(&params(16, PoolingType::Last, false), 4);
        fresh.decode(batch_of(&[Token(9)], &[1], &[0], &[true]));
        assert_eq!(ctx.embeddings_seq(0), fresh.embeddings_seq(0));
    }

    #[test]
    fn pooled_embeddings_depend_on_pooling_type() {
        let make = |pooling| {
            let mut ctx = SimContext::new(&params(16, pooling, false), 4);
            ctx.decode(batch_of(
                &[Token(1), Token(2)],
                &[0, 1],
                &[0, 0],
                &[false, true],
            ));
            ctx.embeddings_seq(0).unwrap()
        };
        let cls = make(PoolingType::Cls);
        let last = make(PoolingType::Last);
        let mean = make(PoolingType::Mean);
        assert_ne!(cls, last);
        assert_ne!(mean, last);
        for (m, (c, l)) in mean.iter().zip(cls.iter().zip(last.iter())) {
            assert!((m - (c + l) / 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn attach_threadpool_rebinds_the_stored_pools() {
        let mut ctx = SimContext::new(&params(8, PoolingType::Unspecified, false), 8);
        assert!(ctx.threadpools().is_none());

        let compute = Threadpool::with_threads(4);
        let batch = Threadpool::default();
        ctx.attach_threadpool(&compute, &batch);
        assert_eq!(ctx.threadpools(), Some((compute, batch)));
    }

    #[test]
    fn save_state_writes_a_parseable_blob() {
        let mut ctx = SimContext::new(&params(16, PoolingType::Unspecified, false), 8);
        ctx.decode(batch_of(&[Token(7)], &[0], &[2], &[true]));

        let path =
            std::env::temp_dir().join(format!("karst-sim-state-{}.bin", std::process::id()));
        assert!(ctx.save_state_file(&path, &[Token(7)]));

        let blob = std::fs::read(&path).unwrap();
        assert!(!blob.is_empty());
        let parsed: serde_json::Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(parsed["tokens"][0], 7);
        std::fs::remove_file(&path).ok();

        // unwritable path reports failure without panicking
        assert!(!ctx.save_state_file(Path::new("/nonexistent-dir/state.bin"), &[]));
    }
}
