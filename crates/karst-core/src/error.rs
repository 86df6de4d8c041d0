use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Model construction failed; no partial object exists.
    #[error("model load failed: {0}")]
    Load(String),

    /// Context construction failed; no partial object exists.
    #[error("context init failed: {0}")]
    ContextInit(String),

    #[error("batch is full (capacity {capacity})")]
    BatchCapacity { capacity: usize },

    #[error("cannot decode an empty batch")]
    EmptyBatch,

    /// Fatal engine status (< 0). The context is unusable until `reset`.
    #[error("decode failed with engine code {code}")]
    Decode { code: i32 },

    /// Operation rejected: the context hit a fatal decode and has not been
    /// reset since.
    #[error("context is unusable after a fatal decode; call reset() first")]
    NeedsReset,

    #[error("operation requires a pooling type other than None")]
    PoolingRequired,

    #[error("kv position divisor must be > 1, got {d}")]
    InvalidDivisor { d: i64 },

    #[error("output buffer too small: need {needed} floats, got {got}")]
    OutputTooSmall { needed: usize, got: usize },

    /// Engine-reported failure outside the decode status channel.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
