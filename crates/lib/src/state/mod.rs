//! Persisted run state.
//!
//! After every run the resources that were reconciled are recorded together
//! with their resolved attributes and provider outputs. The next run reads
//! this back only to find orphans (recorded resources that are no longer
//! declared); the truth about live resources always comes from the provider.

mod storage;
mod types;

pub use storage::StateStore;
pub use types::*;
