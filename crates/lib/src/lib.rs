//! stratus-lib: Core types and logic for Stratus
//!
//! This crate provides the reconcile engine behind the `stratus` CLI:
//! - `DesiredState`: the declarative description of one deployment
//! - `Manifest`: the lowered set of resources with their references
//! - `ResourceDag`: dependency ordering and cycle detection
//! - `Plan`: the per-resource actions a run would take
//! - `Provider`: the seam to the cloud platform, with a local implementation
//! - `RunState`: what previous runs created, persisted between runs

pub mod artifact;
pub mod consts;
pub mod desired;
pub mod execute;
pub mod manifest;
pub mod plan;
pub mod platform;
pub mod policy;
pub mod provider;
pub mod resource;
pub mod state;
pub mod trigger;
pub mod util;
