//! # karst-sim
//!
//! A deterministic, in-process engine behind the karst contract. No real
//! inference happens here: decode outputs are pure functions of
//! `(token, stored position, sequence id)`, which makes every KV-cache edit
//! observable and repeatable. Used by the facade's integration tests and as a
//! worked example for driver authors.

pub mod context;
pub mod model;
pub mod vocab;

pub use context::SimContext;
pub use model::{SimDriver, SimModel, SimModelSpec};
