//! Resource model.
//!
//! Kind-agnostic resources, their attribute values and ownership annotations,
//! plus the typed entity descriptions they are lowered from.

pub mod kinds;
mod types;

pub use types::*;
