//! Status snapshots and job results.

use super::JobState;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Point-in-time view of a job, as returned by one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Lifecycle state.
    pub state: JobState,
    /// Progress in `0.0..=1.0`.
    pub progress: f64,
    /// Backend status message.
    #[serde(default)]
    pub message: String,
    /// When the backend last updated the job.
    pub updated_at: Timestamp,
}

impl StatusSnapshot {
    /// Creates a snapshot stamped with the current time.
    ///
    /// Progress is clamped into `0.0..=1.0`.
    #[must_use]
    pub fn new(state: JobState, progress: f64, message: impl Into<String>) -> Self {
        Self {
            state,
            progress: clamp_progress(progress),
            message: message.into(),
            updated_at: now_utc(),
        }
    }

    /// The snapshot every freshly submitted job starts with.
    #[must_use]
    pub fn submitted() -> Self {
        Self::new(JobState::Submitted, 0.0, "Job submitted")
    }

    /// Returns true if the job reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if the job completed successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.state.is_success()
    }

    /// Returns true while the job is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Outputs and diagnostics of a completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobResults {
    /// Output name to produced location.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Execution log lines.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Runner metrics.
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Runner metadata (execution time, command, ...).
    #[serde(default)]
    pub execution_metadata: BTreeMap<String, serde_json::Value>,
}

impl JobResults {
    /// Creates empty results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output location.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), location.into());
        self
    }

    /// Adds a metric.
    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Returns the location of a named output.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    /// Writes the results as pretty JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> crate::errors::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// What completion callbacks receive.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionNotice {
    /// The job id.
    pub job_id: String,
    /// The terminal snapshot.
    pub snapshot: StatusSnapshot,
    /// Results, present when the job completed and they could be fetched.
    pub results: Option<JobResults>,
}

/// One entry of a runner's job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// The job id.
    pub job_id: String,
    /// Status at listing time.
    pub status: StatusSnapshot,
}
