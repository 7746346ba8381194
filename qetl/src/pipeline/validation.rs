//! Structural validation of pipeline definitions.
//!
//! Checks run in a fixed order: name uniqueness, dependency references,
//! cycles, then execution parameters. All issues are collected so callers
//! see every problem at once.

use super::dag::DependencyGraph;
use super::spec::PipelineSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lowest accepted priority.
pub const MIN_PRIORITY: i64 = 0;
/// Highest accepted priority.
pub const MAX_PRIORITY: i64 = 100;

/// Category of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssueKind {
    /// A name appears more than once within its collection.
    DuplicateName,
    /// A dependency names a step that does not exist.
    UnknownDependency,
    /// The dependency graph contains a cycle.
    CyclicDependency,
    /// An execution parameter is out of range.
    InvalidParameter,
}

impl fmt::Display for ValidationIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "DuplicateNameError"),
            Self::UnknownDependency => write!(f, "UnknownDependencyError"),
            Self::CyclicDependency => write!(f, "CyclicDependencyError"),
            Self::InvalidParameter => write!(f, "InvalidParameterError"),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// The issue category.
    pub kind: ValidationIssueKind,
    /// Path of the offending field, e.g. `transformations[2].dependencies`.
    pub field: String,
    /// Human readable description.
    pub message: String,
    /// Step names involved (missing dependency, cycle sequence, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl ValidationIssue {
    /// Creates a new issue.
    #[must_use]
    pub fn new(
        kind: ValidationIssueKind,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
            subjects: Vec::new(),
        }
    }

    /// Sets the involved names.
    #[must_use]
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.field, self.message)
    }
}

/// Outcome of validating a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when no issues were found.
    pub ok: bool,
    /// All issues, in check order.
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Builds a result from collected issues.
    #[must_use]
    pub fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }

    /// Returns true if any issue has the given kind.
    #[must_use]
    pub fn has(&self, kind: ValidationIssueKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Returns the issues of the given kind.
    #[must_use]
    pub fn of_kind(&self, kind: ValidationIssueKind) -> Vec<&ValidationIssue> {
        self.errors.iter().filter(|e| e.kind == kind).collect()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return write!(f, "valid");
        }
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Validates a pipeline without mutating it.
#[must_use]
pub fn validate_spec(spec: &PipelineSpec) -> ValidationResult {
    let mut issues = Vec::new();

    check_unique(
        "input_sources",
        spec.inputs.iter().map(|i| i.name.as_str()),
        &mut issues,
    );
    check_unique(
        "transformations",
        spec.steps.iter().map(|s| s.name.as_str()),
        &mut issues,
    );
    check_unique(
        "outputs",
        spec.outputs.iter().map(|o| o.name.as_str()),
        &mut issues,
    );
    check_references(spec, &mut issues);
    check_cycles(spec, &mut issues);
    check_execution(spec, &mut issues);

    ValidationResult::from_issues(issues)
}

fn check_unique<'a>(
    collection: &str,
    names: impl Iterator<Item = &'a str>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen = HashSet::new();
    for (index, name) in names.enumerate() {
        if !seen.insert(name) {
            issues.push(
                ValidationIssue::new(
                    ValidationIssueKind::DuplicateName,
                    format!("{collection}[{index}].name"),
                    format!("Duplicate name '{name}' in {collection}"),
                )
                .with_subjects(vec![name.to_string()]),
            );
        }
    }
}

fn check_references(spec: &PipelineSpec, issues: &mut Vec<ValidationIssue>) {
    let declared: HashSet<&str> = spec.steps.iter().map(|s| s.name.as_str()).collect();

    for (index, step) in spec.steps.iter().enumerate() {
        for dep in &step.dependencies {
            if !declared.contains(dep.as_str()) {
                issues.push(
                    ValidationIssue::new(
                        ValidationIssueKind::UnknownDependency,
                        format!("transformations[{index}].dependencies"),
                        format!("Step '{}' depends on unknown step '{dep}'", step.name),
                    )
                    .with_subjects(vec![dep.clone()]),
                );
            }
        }
    }
}

fn check_cycles(spec: &PipelineSpec, issues: &mut Vec<ValidationIssue>) {
    for cycle in DependencyGraph::new(&spec.steps).detect_cycles() {
        issues.push(
            ValidationIssue::new(
                ValidationIssueKind::CyclicDependency,
                "transformations",
                format!("Dependency cycle: {}", cycle.join(" -> ")),
            )
            .with_subjects(cycle),
        );
    }
}

fn check_execution(spec: &PipelineSpec, issues: &mut Vec<ValidationIssue>) {
    let params = &spec.execution;

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&params.priority) {
        issues.push(ValidationIssue::new(
            ValidationIssueKind::InvalidParameter,
            "execution.priority",
            format!(
                "Priority {} is outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                params.priority
            ),
        ));
    }
    if params.timeout_seconds <= 0 {
        issues.push(ValidationIssue::new(
            ValidationIssueKind::InvalidParameter,
            "execution.timeout",
            format!("Timeout must be positive, got {}", params.timeout_seconds),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExecutionParams, InputSource, OutputSpec, TransformStep};

    fn spec_with_steps(steps: Vec<TransformStep>) -> PipelineSpec {
        let mut spec = PipelineSpec::new("test");
        spec.inputs.push(InputSource::new("in", "s3://bucket/in.csv"));
        spec.outputs.push(OutputSpec::new("out", "out.json"));
        spec.steps = steps;
        spec
    }

    #[test]
    fn test_valid_spec() {
        let spec = spec_with_steps(vec![
            TransformStep::new("a", "comp"),
            TransformStep::new("b", "comp").with_dependency("a"),
        ]);
        let result = spec.validate();

        assert!(result.ok);
        assert!(result.errors.is_empty());
        assert_eq!(result.to_string(), "valid");
    }

    #[test]
    fn test_unknown_dependency_names_missing_step() {
        let spec = spec_with_steps(vec![TransformStep::new("b", "comp").with_dependency("a")]);
        let result = spec.validate();

        assert!(!result.ok);
        let issues = result.of_kind(ValidationIssueKind::UnknownDependency);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subjects, vec!["a".to_string()]);
        assert_eq!(issues[0].field, "transformations[0].dependencies");
    }

    #[test]
    fn test_duplicate_names_reported_per_duplicate() {
        let mut spec = spec_with_steps(vec![
            TransformStep::new("a", "comp"),
            TransformStep::new("a", "comp"),
            TransformStep::new("a", "comp"),
        ]);
        spec.inputs.push(InputSource::new("in", "elsewhere"));

        let result = spec.validate();
        let dupes = result.of_kind(ValidationIssueKind::DuplicateName);

        assert_eq!(dupes.len(), 3);
        assert_eq!(dupes[0].field, "input_sources[1].name");
        assert_eq!(dupes[1].field, "transformations[1].name");
        assert_eq!(dupes[2].field, "transformations[2].name");
    }

    #[test]
    fn test_cycle_reported() {
        let spec = spec_with_steps(vec![
            TransformStep::new("a", "comp").with_dependency("b"),
            TransformStep::new("b", "comp").with_dependency("a"),
        ]);
        let result = spec.validate();

        assert!(result.has(ValidationIssueKind::CyclicDependency));
        assert!(result.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_invalid_parameters() {
        let mut spec = spec_with_steps(vec![TransformStep::new("a", "comp")]);
        spec.execution = ExecutionParams::new()
            .with_priority(101)
            .with_timeout_seconds(0);

        let result = spec.validate();
        let params = result.of_kind(ValidationIssueKind::InvalidParameter);

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].field, "execution.priority");
        assert_eq!(params[1].field, "execution.timeout");
    }

    #[test]
    fn test_priority_bounds_inclusive() {
        for priority in [0, 100] {
            let mut spec = spec_with_steps(vec![TransformStep::new("a", "comp")]);
            spec.execution.priority = priority;
            assert!(spec.validate().ok, "priority {priority} should be accepted");
        }
    }

    #[test]
    fn test_checks_run_in_order() {
        let mut spec = spec_with_steps(vec![
            TransformStep::new("a", "comp").with_dependencies(["a", "ghost"]),
            TransformStep::new("a", "comp"),
        ]);
        spec.execution.priority = -1;

        let kinds: Vec<_> = spec.validate().errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ValidationIssueKind::DuplicateName,
                ValidationIssueKind::UnknownDependency,
                ValidationIssueKind::CyclicDependency,
                ValidationIssueKind::InvalidParameter,
            ]
        );
    }

    #[test]
    fn test_deep_reversed_chain_is_valid() {
        let mut spec = crate::testing::chain_pipeline(10_000);
        spec.steps.reverse();

        let result = spec.validate();
        assert!(result.ok, "{result}");
    }

    #[test]
    fn test_validation_is_idempotent() {
        let spec = spec_with_steps(vec![
            TransformStep::new("a", "comp").with_dependency("c"),
            TransformStep::new("b", "comp").with_dependency("a"),
            TransformStep::new("c", "comp").with_dependencies(["a", "b"]),
        ]);
        let before = spec.clone();

        let first = spec.validate();
        let second = spec.validate();

        assert_eq!(first, second);
        assert_eq!(spec, before);
    }
}
