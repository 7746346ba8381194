//! Assertions for validation results and jobs.

use crate::job::{Job, JobState};
use crate::pipeline::{ValidationIssue, ValidationIssueKind, ValidationResult};

/// Asserts that validation passed.
pub fn assert_valid(result: &ValidationResult) {
    assert!(result.ok, "Expected a valid pipeline, got: {result}");
}

/// Asserts that validation failed with at least one issue of `kind` and
/// returns the first such issue.
pub fn assert_invalid_with(result: &ValidationResult, kind: ValidationIssueKind) -> &ValidationIssue {
    assert!(!result.ok, "Expected an invalid pipeline");
    match result.errors.iter().find(|issue| issue.kind == kind) {
        Some(issue) => issue,
        None => panic!("Expected a {kind} issue, got: {result}"),
    }
}

/// Asserts the cached state of a job.
pub fn assert_job_state(job: &Job, expected: JobState) {
    assert_eq!(
        job.state(),
        expected,
        "Expected job {} in state {}, got {}",
        job.id(),
        expected,
        job.state()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_valid() {
        assert_valid(&ValidationResult::from_issues(Vec::new()));
    }

    #[test]
    #[should_panic(expected = "Expected a CyclicDependencyError issue")]
    fn test_assert_invalid_with_wrong_kind() {
        let result = ValidationResult::from_issues(vec![ValidationIssue::new(
            ValidationIssueKind::DuplicateName,
            "outputs[1].name",
            "Duplicate name 'x' in outputs",
        )]);
        assert_invalid_with(&result, ValidationIssueKind::CyclicDependency);
    }
}
