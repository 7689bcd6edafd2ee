//! CLI integration tests.

mod apply_tests;
mod common;
mod plan_tests;
