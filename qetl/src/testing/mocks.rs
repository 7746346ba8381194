//! Scripted runner for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::errors::{QetlError, Result};
use crate::job::{JobResults, JobState, JobSummary, StatusSnapshot};
use crate::pipeline::PipelineSpec;
use crate::runner::{InstanceInfo, RunnerClient};

#[derive(Debug, Default)]
struct ScriptedJob {
    script: VecDeque<StatusSnapshot>,
    current: Option<StatusSnapshot>,
    results: Option<JobResults>,
}

impl ScriptedJob {
    fn state(&self) -> JobState {
        self.current.as_ref().map_or(JobState::Submitted, |s| s.state)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submit: usize,
    poll: usize,
    cancel: usize,
    fetch: usize,
}

/// A runner that replays scripted status sequences.
///
/// Each poll of a job returns the next scripted snapshot; the last one
/// repeats once the script runs out. Cancel and fetch calls are answered
/// from the most recently polled state and never alter the script.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    jobs: Mutex<HashMap<String, ScriptedJob>>,
    default_script: Mutex<Vec<StatusSnapshot>>,
    rejection: Mutex<Option<(String, String)>>,
    submitted: Mutex<Vec<PipelineSpec>>,
    counters: Mutex<Counters>,
    fetch_delay: Mutex<Duration>,
}

impl ScriptedRunner {
    /// Creates a runner with no jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the script given to every newly submitted job.
    #[must_use]
    pub fn with_default_script(self, script: Vec<StatusSnapshot>) -> Self {
        *self.default_script.lock() = script;
        self
    }

    /// Makes every submission fail with a `Submission` error.
    #[must_use]
    pub fn with_rejection(self, code: impl Into<String>, message: impl Into<String>) -> Self {
        *self.rejection.lock() = Some((code.into(), message.into()));
        self
    }

    /// Delays every `fetch_results` answer by `delay`.
    #[must_use]
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock() = delay;
        self
    }

    /// Replaces the status script of a job, creating the job if needed.
    pub fn script_status(&self, job_id: &str, script: Vec<StatusSnapshot>) {
        self.jobs.lock().entry(job_id.to_string()).or_default().script = script.into();
    }

    /// Sets the results returned once the job is `Completed`.
    pub fn set_results(&self, job_id: &str, results: JobResults) {
        self.jobs.lock().entry(job_id.to_string()).or_default().results = Some(results);
    }

    /// Returns every spec passed to `submit`, in order.
    #[must_use]
    pub fn submitted_specs(&self) -> Vec<PipelineSpec> {
        self.submitted.lock().clone()
    }

    /// Number of `submit` calls.
    #[must_use]
    pub fn submit_count(&self) -> usize {
        self.counters.lock().submit
    }

    /// Number of `poll` calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.counters.lock().poll
    }

    /// Number of `cancel` calls.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.counters.lock().cancel
    }

    /// Number of `fetch_results` calls.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.counters.lock().fetch
    }

    /// Resets call tracking.
    pub fn reset_counts(&self) {
        *self.counters.lock() = Counters::default();
    }
}

#[async_trait]
impl RunnerClient for ScriptedRunner {
    async fn submit(&self, spec: &PipelineSpec) -> Result<String> {
        self.counters.lock().submit += 1;
        if let Some((code, message)) = self.rejection.lock().clone() {
            return Err(QetlError::submission(code, message));
        }

        let mut submitted = self.submitted.lock();
        submitted.push(spec.clone());
        let job_id = format!("job_{}", submitted.len());

        let script = self.default_script.lock().clone();
        self.jobs.lock().entry(job_id.clone()).or_default().script = script.into();
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<StatusSnapshot> {
        self.counters.lock().poll += 1;
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| QetlError::job_not_found(job_id))?;

        let snapshot = if job.script.len() > 1 {
            job.script.pop_front()
        } else {
            job.script.front().cloned()
        }
        .or_else(|| job.current.clone())
        .unwrap_or_else(StatusSnapshot::submitted);

        job.current = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        self.counters.lock().cancel += 1;
        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| QetlError::job_not_found(job_id))?;
        Ok(job.state().is_cancellable())
    }

    async fn fetch_results(&self, job_id: &str) -> Result<JobResults> {
        self.counters.lock().fetch += 1;
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| QetlError::job_not_found(job_id))?;

        match job.state() {
            JobState::Completed => Ok(job.results.clone().unwrap_or_default()),
            state => Err(QetlError::ResultsNotReady {
                job_id: job_id.to_string(),
                state,
            }),
        }
    }

    async fn logs(&self, job_id: &str) -> Result<Vec<String>> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| QetlError::job_not_found(job_id))?;

        if let (JobState::Completed, Some(results)) = (job.state(), &job.results) {
            return Ok(results.logs.clone());
        }
        Ok(job
            .current
            .iter()
            .map(|s| s.message.clone())
            .filter(|m| !m.is_empty())
            .collect())
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobSummary>> {
        let jobs = self.jobs.lock();
        let mut summaries: Vec<JobSummary> = jobs
            .iter()
            .filter(|(_, job)| state.is_none() || state == Some(job.state()))
            .map(|(id, job)| JobSummary {
                job_id: id.clone(),
                status: job.current.clone().unwrap_or_else(StatusSnapshot::submitted),
            })
            .collect();
        summaries.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn instance_info(&self) -> Result<InstanceInfo> {
        Ok(InstanceInfo::new("scripted").with_detail("jobs", self.jobs.lock().len().into()))
    }
}
