pub mod batch;
pub mod cache;
pub mod context;
pub mod debug;
pub mod error;
pub mod model;
pub mod params;

pub use batch::Batch;
pub use context::{Context, DecodeStatus};
pub use error::{Error, Result};
pub use model::Model;
pub use params::{GptParams, MirostatParams, PenaltyParams, SamplerParams};

pub use karst_abi::{
    BatchRef, ChatTurn, ContextParams, EmbeddingNorm, PoolingType, Pos, Role, SeqId, Threadpool,
    Token,
};
