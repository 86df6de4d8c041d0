use serde::{Deserialize, Serialize};

/// Strategy for reducing per-token embeddings to one vector per sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingType {
    /// Engine/model decides.
    Unspecified,
    /// No pooling; per-sequence embeddings are undefined.
    None,
    Mean,
    Cls,
    Last,
    /// Reranking models attach the classification head to the graph.
    Rank,
}

impl PoolingType {
    /// Numeric form used by native engines (-1 = unspecified).
    pub fn as_raw(self) -> i32 {
        match self {
            PoolingType::Unspecified => -1,
            PoolingType::None => 0,
            PoolingType::Mean => 1,
            PoolingType::Cls => 2,
            PoolingType::Last => 3,
            PoolingType::Rank => 4,
        }
    }
}

/// Normalization applied to a pooled embedding row before it is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingNorm {
    None,
    /// Divide by the largest absolute component.
    MaxAbs,
    /// Euclidean (L2) normalization.
    L2,
}

/// Compute pool configuration handed to the engine. Pools are passed
/// explicitly at context construction and rebound only through an explicit
/// call, never via implicit global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threadpool {
    /// 0 lets the facade pick a host-sized default.
    pub n_threads: i32,
    pub priority: i32,
    /// Busy-poll level (0 = block on work availability).
    pub poll: u32,
    pub strict_cpu: bool,
}

impl Default for Threadpool {
    fn default() -> Self {
        Self {
            n_threads: 0,
            priority: 0,
            poll: 50,
            strict_cpu: false,
        }
    }
}

impl Threadpool {
    #[inline]
    pub fn with_threads(n_threads: i32) -> Self {
        Self {
            n_threads,
            ..Self::default()
        }
    }
}

/// Plain-copy context configuration. The facade builds one of these from its
/// own params object at construction time; the engine keeps its own copy and
/// never sees later mutation of the source params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_seq_max: u32,
    pub n_threads: i32,
    pub n_threads_batch: i32,
    pub pooling: PoolingType,
    pub embeddings: bool,
}
