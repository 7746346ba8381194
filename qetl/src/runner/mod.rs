//! Backends that execute submitted pipelines.
//!
//! The job model reaches a backend only through [`RunnerClient`]. Two
//! implementations ship with the SDK: [`LocalRunner`], which executes jobs
//! in-process, and `RemoteRunner` (feature `remote`), which talks to the
//! QETL service over HTTP.

mod cancellation;
mod local;
#[cfg(feature = "remote")]
mod remote;

pub use local::{DryRunExecutor, LocalRunner, PipelineExecutor, ProcessExecutor};
#[cfg(feature = "remote")]
pub use remote::RemoteRunner;

use crate::errors::Result;
use crate::job::{JobResults, JobState, JobSummary, StatusSnapshot};
use crate::pipeline::components::{builtin_components, ComponentInfo};
use crate::pipeline::PipelineSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Description of the backend a runner talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// `local`, `remote`, or a backend specific name.
    pub mode: String,
    /// Service endpoint, for remote backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Everything else the backend reports.
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

impl InstanceInfo {
    /// Creates an entry with no details.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            endpoint: None,
            details: BTreeMap::new(),
        }
    }

    /// Adds one detail.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// The capability the SDK uses to reach an execution backend.
///
/// Implementations must be safe for concurrent calls on different job ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunnerClient: Send + Sync {
    /// Submits a validated pipeline and returns the new job id.
    ///
    /// # Errors
    ///
    /// `Submission` when the backend rejects the pipeline, `Transport` when
    /// it cannot be reached.
    async fn submit(&self, spec: &PipelineSpec) -> Result<String>;

    /// Returns the current status of a job.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown id.
    async fn poll(&self, job_id: &str) -> Result<StatusSnapshot>;

    /// Requests cancellation. Returns true if the backend accepted it.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown id.
    async fn cancel(&self, job_id: &str) -> Result<bool>;

    /// Fetches the results of a completed job.
    ///
    /// # Errors
    ///
    /// `ResultsNotReady` unless the job is `Completed`.
    async fn fetch_results(&self, job_id: &str) -> Result<JobResults>;

    /// Returns the execution log lines of a job.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown id.
    async fn logs(&self, job_id: &str) -> Result<Vec<String>>;

    /// Lists known jobs, optionally only those in `state`, returning at
    /// most `limit` entries.
    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobSummary>>;

    /// Lists the processing components the backend offers.
    async fn list_components(&self) -> Result<Vec<ComponentInfo>> {
        Ok(builtin_components())
    }

    /// Describes the backend.
    async fn instance_info(&self) -> Result<InstanceInfo>;
}
