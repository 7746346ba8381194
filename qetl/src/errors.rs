//! Error types for the QETL SDK.
//!
//! Configuration problems are detected locally before any runner call.
//! Everything else mirrors what the backend reported, so callers can tell a
//! rejected submission from an unreachable backend or a failed job.

use crate::job::JobState;
use crate::pipeline::ValidationResult;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = QetlError> = std::result::Result<T, E>;

/// The main error type for SDK operations.
#[derive(Debug, Error)]
pub enum QetlError {
    /// The pipeline or client configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The backend rejected a structurally valid submission.
    #[error("Submission rejected [{code}]: {message}")]
    Submission {
        /// Backend or HTTP error code.
        code: String,
        /// Human readable reason.
        message: String,
    },

    /// The backend could not be reached or refused the credentials.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The job id is unknown to the backend.
    #[error("Job not found: {job_id}")]
    JobNotFound {
        /// The unknown job id.
        job_id: String,
    },

    /// The job reached `Failed`.
    #[error("Job {job_id} failed: {message}")]
    JobFailed {
        /// The job id.
        job_id: String,
        /// Message from the last status snapshot.
        message: String,
    },

    /// The job reached `Cancelled`.
    #[error("Job {job_id} was cancelled")]
    JobCancelled {
        /// The job id.
        job_id: String,
    },

    /// Waiting for a terminal state exceeded the caller's timeout.
    #[error("Job {job_id} timed out after {timeout:?} (last state: {last_state})")]
    JobTimeout {
        /// The job id.
        job_id: String,
        /// The timeout that was exceeded.
        timeout: Duration,
        /// Last state observed before giving up.
        last_state: JobState,
    },

    /// The backend reported a transition the lifecycle does not allow.
    #[error("Job {job_id} reported illegal transition {from} -> {to}")]
    UnexpectedState {
        /// The job id.
        job_id: String,
        /// Last known state.
        from: JobState,
        /// State reported by the backend.
        to: JobState,
    },

    /// Results were requested before the job completed.
    #[error("Results for job {job_id} are not ready (state: {state})")]
    ResultsNotReady {
        /// The job id.
        job_id: String,
        /// State at the time of the request.
        state: JobState,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task ended without producing a result.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl QetlError {
    /// Creates a submission error.
    #[must_use]
    pub fn submission(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Submission {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a job-not-found error.
    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(err) => err.code(),
            Self::Submission { .. } => "SUBMISSION_ERROR",
            Self::Transport(err) => err.code(),
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::JobFailed { .. } => "JOB_FAILED",
            Self::JobCancelled { .. } => "JOB_CANCELLED",
            Self::JobTimeout { .. } => "TIMEOUT_ERROR",
            Self::UnexpectedState { .. } => "UNEXPECTED_STATE",
            Self::ResultsNotReady { .. } => "RESULTS_NOT_READY",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
    }

    /// Returns true if the error was produced without contacting a backend.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Serialization(_))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::JobNotFound { job_id }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id }
            | Self::JobTimeout { job_id, .. }
            | Self::UnexpectedState { job_id, .. }
            | Self::ResultsNotReady { job_id, .. } => {
                map.insert("job_id".to_string(), serde_json::json!(job_id));
            }
            Self::Configuration(ConfigurationError::InvalidPipeline(result)) => {
                map.insert(
                    "validation_errors".to_string(),
                    serde_json::to_value(&result.errors).unwrap_or_default(),
                );
            }
            _ => {}
        }

        map
    }
}

impl From<serde_yaml::Error> for QetlError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for QetlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Problems detectable before any backend interaction.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A name is already used within its collection.
    #[error("Duplicate {collection} name: '{name}'")]
    DuplicateName {
        /// The collection (`input_sources`, `transformations`, `outputs`).
        collection: String,
        /// The conflicting name.
        name: String,
    },

    /// Validation of the assembled pipeline failed.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(ValidationResult),

    /// A required client setting is absent.
    #[error("Missing configuration setting '{setting}': {hint}")]
    MissingSetting {
        /// The setting name.
        setting: String,
        /// How to provide it.
        hint: String,
    },

    /// A client setting has a value that cannot be used.
    #[error("Invalid value '{value}' for setting '{setting}'")]
    InvalidSetting {
        /// The setting name.
        setting: String,
        /// The rejected value.
        value: String,
    },

    /// The requested mode or feature is not available in this build.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

impl ConfigurationError {
    /// Creates a duplicate-name error.
    #[must_use]
    pub fn duplicate_name(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Creates a missing-setting error.
    #[must_use]
    pub fn missing_setting(setting: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingSetting {
            setting: setting.into(),
            hint: hint.into(),
        }
    }

    /// Creates an invalid-setting error.
    #[must_use]
    pub fn invalid_setting(setting: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            value: value.into(),
        }
    }

    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::InvalidPipeline(_) => "VALIDATION_ERROR",
            Self::MissingSetting { .. } | Self::InvalidSetting { .. } | Self::Unsupported(_) => {
                "CONFIG_ERROR"
            }
        }
    }

    /// Returns the validation result if this is an invalid pipeline error.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            Self::InvalidPipeline(result) => Some(result),
            _ => None,
        }
    }
}

/// Failures of the channel to the backend, kept apart from business errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The backend could not be reached.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials lack permission.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The backend asked the client to slow down.
    #[error("Rate limit exceeded (retry after: {retry_after:?})")]
    RateLimited {
        /// Seconds to wait, when the backend said so.
        retry_after: Option<u64>,
    },

    /// Any other unexpected HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// The status code.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The backend answered with a payload the client cannot read.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) | Self::Http { .. } | Self::MalformedResponse(_) => {
                "NETWORK_ERROR"
            }
            Self::Authentication(_) => "AUTH_ERROR",
            Self::Authorization(_) => "AUTHZ_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ValidationIssue, ValidationIssueKind};

    #[test]
    fn test_duplicate_name_message() {
        let err = ConfigurationError::duplicate_name("input_sources", "drug_data");
        assert_eq!(err.to_string(), "Duplicate input_sources name: 'drug_data'");
        assert_eq!(err.code(), "DUPLICATE_NAME");
    }

    #[test]
    fn test_invalid_pipeline_to_dict() {
        let result = ValidationResult::from_issues(vec![ValidationIssue::new(
            ValidationIssueKind::UnknownDependency,
            "transformations[0].dependencies",
            "Step 'b' depends on unknown step 'a'",
        )]);
        let err = QetlError::from(ConfigurationError::InvalidPipeline(result));

        let dict = err.to_dict();
        assert_eq!(dict.get("code").unwrap(), "VALIDATION_ERROR");
        assert!(dict.contains_key("validation_errors"));
        assert!(err.is_local());
    }

    #[test]
    fn test_terminal_outcome_codes() {
        let failed = QetlError::JobFailed {
            job_id: "j1".to_string(),
            message: "boom".to_string(),
        };
        let timeout = QetlError::JobTimeout {
            job_id: "j1".to_string(),
            timeout: Duration::from_secs(1),
            last_state: JobState::Running,
        };

        assert_eq!(failed.code(), "JOB_FAILED");
        assert!(failed.to_string().contains("boom"));
        assert_eq!(timeout.code(), "TIMEOUT_ERROR");
        assert!(timeout.to_string().contains("running"));
        assert!(!timeout.is_local());
    }

    #[test]
    fn test_transport_error_codes() {
        assert_eq!(TransportError::Authentication("bad key".into()).code(), "AUTH_ERROR");
        assert_eq!(
            TransportError::RateLimited { retry_after: Some(3) }.code(),
            "RATE_LIMIT_ERROR"
        );
        let err: QetlError = TransportError::Unreachable("connection refused".into()).into();
        assert_eq!(err.code(), "NETWORK_ERROR");
    }
}
