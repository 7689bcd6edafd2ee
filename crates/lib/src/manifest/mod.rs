//! Resource manifests.
//!
//! Manifests are the lowered result of a desired-state description, holding
//! every declared resource ready for graph building and planning.

mod types;

pub use types::*;
