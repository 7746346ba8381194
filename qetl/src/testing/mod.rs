//! Testing utilities for code built on the SDK.
//!
//! This module provides:
//! - A scripted in-memory runner
//! - Sample pipelines
//! - Assertions for validation results and jobs

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_invalid_with, assert_job_state, assert_valid};
pub use fixtures::{chain_pipeline, drug_discovery_pipeline, wide_pipeline};
pub use mocks::ScriptedRunner;
