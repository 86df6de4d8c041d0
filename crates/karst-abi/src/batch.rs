use crate::token::{Pos, SeqId, Token};

/// Borrowed structure-of-arrays view of one decode batch.
///
/// All four slices have the same length; entry `i` is the tuple
/// `(token[i], pos[i], seq_id[i], output[i])`. Built by the facade's batch
/// builder; engine drivers only ever read it.
#[derive(Debug, Clone, Copy)]
pub struct BatchRef<'a> {
    pub token: &'a [Token],
    pub pos: &'a [Pos],
    pub seq_id: &'a [SeqId],
    /// Logits/embeddings requested for this entry.
    pub output: &'a [bool],
}

impl<'a> BatchRef<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.token.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}
