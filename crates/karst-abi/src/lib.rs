//! Karst ABI crate: stable contracts shared by the facade layer and engine drivers.

pub mod batch;
pub mod chat;
pub mod engine;
pub mod params;
pub mod token;

pub use batch::*;
pub use chat::*;
pub use engine::*;
pub use params::*;
pub use token::*;
