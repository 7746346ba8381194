//! Pipeline description, validation and job construction.
//!
//! This module provides:
//! - The pipeline definition and its YAML form
//! - Structural validation (names, references, cycles, parameters)
//! - Dependency graph analysis
//! - The fluent [`JobBuilder`] and component shortcuts

mod builder;
pub mod components;
mod dag;
mod spec;
mod validation;


pub use builder::{JobBuilder, TransformOptions};
pub use components::{builtin_components, ComponentInfo};
pub use dag::{detect_cycles, execution_order, DependencyGraph};
pub use spec::{
    ConfigMap, ExecutionParams, InputSource, OutputSpec, PipelineSpec, TransformStep,
    AUTO_SOURCE_TYPE, DEFAULT_OUTPUT_FORMAT, DEFAULT_PIPELINE_NAME, DEFAULT_PIPELINE_VERSION,
    DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECONDS,
};
pub use validation::{
    validate_spec, ValidationIssue, ValidationIssueKind, ValidationResult, MAX_PRIORITY,
    MIN_PRIORITY,
};
