//! In-process job execution.
//!
//! Every submitted job gets its own task that walks the lifecycle
//! `Submitted -> Validating -> Queued -> Running -> Completed | Failed`.
//! At most `max_concurrent_jobs` jobs run at once; the rest wait in
//! `Queued`. A cancelled job stops at its next suspension point and keeps
//! its `Cancelled` status, whatever its task would have reported later.
//!
//! Finished jobs stay in the table until [`LocalRunner::forget`] or
//! [`LocalRunner::prune_finished`] removes them.

use super::cancellation::CancellationToken;
use super::{InstanceInfo, RunnerClient};
use crate::config::LocalConfig;
use crate::errors::{ConfigurationError, QetlError, Result};
use crate::job::{JobResults, JobState, JobSummary, StatusSnapshot};
use crate::observability::SpanTimer;
use crate::pipeline::{execution_order, PipelineSpec};
use crate::utils::generate_job_id;
use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const CANCELLED_BY_USER: &str = "Job cancelled by user";
const RESULTS_MARKER: &str = "Results saved to";

/// Executes a validated pipeline on behalf of [`LocalRunner`].
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Runs the pipeline to completion.
    ///
    /// The future is dropped if the job is cancelled or times out, so
    /// implementations must release their resources on drop.
    async fn execute(&self, job_id: &str, spec: &PipelineSpec) -> anyhow::Result<JobResults>;
}

/// Resolves the execution plan without processing any data.
///
/// Outputs point at their declared locations and the topological step
/// order is recorded in the execution metadata.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    step_delay: Duration,
}

impl DryRunExecutor {
    /// Creates an executor that finishes immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses for `delay` on every step, to simulate work.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

#[async_trait]
impl PipelineExecutor for DryRunExecutor {
    async fn execute(&self, job_id: &str, spec: &PipelineSpec) -> anyhow::Result<JobResults> {
        let order = execution_order(&spec.steps)
            .ok_or_else(|| anyhow!("Pipeline '{}' has cyclic dependencies", spec.name))?;

        let mut results = JobResults::new();
        for (position, name) in order.iter().enumerate() {
            let component = spec.step(name).map_or("unknown", |step| step.component.as_str());
            info!(job_id, step = %name, component, position = position + 1, "Executing step");
            results.logs.push(format!("Executing step {name} ({component})"));

            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }

        for output in &spec.outputs {
            results.outputs.insert(output.name.clone(), output.path.clone());
        }
        results.metrics.insert("steps".to_string(), json!(order.len()));
        results.metrics.insert("inputs".to_string(), json!(spec.inputs.len()));
        results.metrics.insert("dry_run".to_string(), json!(true));
        results
            .execution_metadata
            .insert("execution_order".to_string(), json!(order));

        Ok(results)
    }
}

/// Runs an external pipeline runner as a child process.
///
/// The pipeline is written to `{work_dir}/{job_id}.yaml` and the program is
/// invoked as `program [args..] --config <file> --job-id <id>`. Lines of the
/// form `Results saved to <path>` on stdout become the `result_path` output.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl ProcessExecutor {
    /// Creates an executor for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Parses a whitespace separated command line such as `python -m qetl.run`.
    pub fn from_command_line(command: &str, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ConfigurationError::invalid_setting("runner_command", command))?;
        Ok(Self::new(program, work_dir).with_args(parts))
    }

    /// Adds arguments placed before `--config`.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl PipelineExecutor for ProcessExecutor {
    async fn execute(&self, job_id: &str, spec: &PipelineSpec) -> anyhow::Result<JobResults> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", self.work_dir.display()))?;

        let config_path = self.work_dir.join(format!("{job_id}.yaml"));
        tokio::fs::write(&config_path, spec.to_yaml()?)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        debug!(job_id, command = %self.command_line(), config = %config_path.display(), "Starting runner process");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--config")
            .arg(&config_path)
            .arg("--job-id")
            .arg(job_id)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start runner '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Pipeline execution failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut results = JobResults::new();
        for declared in &spec.outputs {
            results.outputs.insert(declared.name.clone(), declared.path.clone());
        }
        for line in stdout.lines() {
            if let Some((_, path)) = line.split_once(RESULTS_MARKER) {
                results.outputs.insert("result_path".to_string(), path.trim().to_string());
            }
            results.logs.push(line.to_string());
        }
        results
            .metrics
            .insert("return_code".to_string(), json!(output.status.code()));
        results
            .metrics
            .insert("execution_command".to_string(), json!(self.command_line()));
        results
            .execution_metadata
            .insert("config_path".to_string(), json!(config_path.display().to_string()));

        Ok(results)
    }
}

struct LocalJob {
    status: StatusSnapshot,
    results: Option<JobResults>,
    log: Vec<String>,
    token: Arc<CancellationToken>,
}

impl LocalJob {
    fn set_status(&mut self, snapshot: StatusSnapshot) {
        if !snapshot.message.is_empty() {
            self.log.push(snapshot.message.clone());
        }
        self.status = snapshot;
    }
}

struct LocalInner {
    executor: Arc<dyn PipelineExecutor>,
    jobs: DashMap<String, LocalJob>,
    slots: Arc<Semaphore>,
    max_concurrent_jobs: usize,
}

/// A [`RunnerClient`] that executes jobs inside the current process.
///
/// Cloning is cheap and clones share the job table.
#[derive(Clone)]
pub struct LocalRunner {
    inner: Arc<LocalInner>,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new(Arc::new(DryRunExecutor::new()), LocalConfig::default().max_concurrent_jobs)
    }
}

impl LocalRunner {
    /// Creates a runner around `executor` running up to `max_concurrent_jobs`
    /// jobs at once (at least one).
    #[must_use]
    pub fn new(executor: Arc<dyn PipelineExecutor>, max_concurrent_jobs: usize) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        Self {
            inner: Arc::new(LocalInner {
                executor,
                jobs: DashMap::new(),
                slots: Arc::new(Semaphore::new(max_concurrent_jobs)),
                max_concurrent_jobs,
            }),
        }
    }

    /// Creates a dry-run runner with default limits.
    #[must_use]
    pub fn dry_run() -> Self {
        Self::default()
    }

    /// Builds a runner from configuration.
    ///
    /// With a `runner_command` jobs run through a [`ProcessExecutor`],
    /// otherwise through a [`DryRunExecutor`].
    pub fn from_config(config: &LocalConfig) -> Result<Self> {
        let executor: Arc<dyn PipelineExecutor> = match &config.runner_command {
            Some(command) => {
                let work_dir = config
                    .work_dir
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("qetl"));
                Arc::new(ProcessExecutor::from_command_line(command, work_dir)?)
            }
            None => Arc::new(DryRunExecutor::new()),
        };
        Ok(Self::new(executor, config.max_concurrent_jobs))
    }

    /// The concurrency limit.
    #[must_use]
    pub fn max_concurrent_jobs(&self) -> usize {
        self.inner.max_concurrent_jobs
    }

    /// Number of jobs known to the runner.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Number of jobs that have not finished yet.
    #[must_use]
    pub fn active_job_count(&self) -> usize {
        self.inner
            .jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }

    /// Drops a finished job and its results from the table.
    ///
    /// Returns `false`, keeping the job, while it is still active.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown id.
    pub fn forget(&self, job_id: &str) -> Result<bool> {
        if !self.inner.jobs.contains_key(job_id) {
            return Err(QetlError::job_not_found(job_id));
        }
        let removed = self
            .inner
            .jobs
            .remove_if(job_id, |_, job| job.status.is_terminal())
            .is_some();
        if removed {
            debug!(job_id, "Forgot finished job");
        }
        Ok(removed)
    }

    /// Drops every finished job, returning how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, job| !job.status.is_terminal());
        let pruned = before.saturating_sub(self.inner.jobs.len());
        if pruned > 0 {
            info!(pruned, remaining = self.inner.jobs.len(), "Pruned finished jobs");
        }
        pruned
    }
}

impl fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRunner")
            .field("jobs", &self.job_count())
            .field("max_concurrent_jobs", &self.inner.max_concurrent_jobs)
            .finish()
    }
}

impl LocalInner {
    /// Applies a status update unless the job already ended.
    fn transition(&self, job_id: &str, snapshot: StatusSnapshot) -> bool {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.status.is_terminal() {
            debug!(job_id, state = %job.status.state, ignored = %snapshot.state, "Ignoring update for finished job");
            return false;
        }
        debug!(job_id, from = %job.status.state, to = %snapshot.state, "Local job transition");
        job.set_status(snapshot);
        true
    }

    fn complete(&self, job_id: &str, results: JobResults) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            if job.status.is_terminal() {
                return;
            }
            job.log.extend(results.logs.iter().cloned());
            job.results = Some(results);
            job.set_status(StatusSnapshot::new(JobState::Completed, 1.0, "Job completed successfully"));
            info!(job_id, "Local job completed");
        }
    }

    fn fail(&self, job_id: &str, message: String) {
        let progress = self.jobs.get(job_id).map_or(0.0, |job| job.status.progress);
        warn!(job_id, error = %message, "Local job failed");
        self.transition(job_id, StatusSnapshot::new(JobState::Failed, progress, message));
    }

    async fn drive(self: Arc<Self>, job_id: String, spec: PipelineSpec, token: Arc<CancellationToken>) {
        let timer = SpanTimer::start("local_job");

        if !self.transition(
            &job_id,
            StatusSnapshot::new(JobState::Validating, 0.1, "Validating configuration"),
        ) {
            return;
        }
        let validation = spec.validate();
        if !validation.ok {
            let reasons: Vec<_> = validation.errors.iter().map(|e| e.message.as_str()).collect();
            self.fail(&job_id, format!("Validation failed: {}", reasons.join("; ")));
            return;
        }

        if !self.transition(
            &job_id,
            StatusSnapshot::new(JobState::Queued, 0.2, "Job queued for execution"),
        ) {
            return;
        }
        let permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail(&job_id, "Runner is shutting down".to_string());
                    return;
                }
            },
            () = token.cancelled() => return,
        };

        if !self.transition(
            &job_id,
            StatusSnapshot::new(JobState::Running, 0.4, "Executing pipeline"),
        ) {
            return;
        }
        let limit = Duration::from_secs(u64::try_from(spec.execution.timeout_seconds).unwrap_or(1).max(1));
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(limit, self.executor.execute(&job_id, &spec)) => outcome,
            () = token.cancelled() => {
                debug!(job_id = %job_id, reason = ?token.reason(), "Execution abandoned");
                return;
            }
        };
        drop(permit);

        match outcome {
            Ok(Ok(mut results)) => {
                results
                    .execution_metadata
                    .insert("execution_time_ms".to_string(), json!(timer.elapsed_ms()));
                self.complete(&job_id, results);
            }
            Ok(Err(e)) => self.fail(&job_id, format!("{e:#}")),
            Err(_) => self.fail(
                &job_id,
                format!("Pipeline execution timed out after {} seconds", limit.as_secs()),
            ),
        }
    }
}

#[async_trait]
impl RunnerClient for LocalRunner {
    async fn submit(&self, spec: &PipelineSpec) -> Result<String> {
        let validation = spec.validate();
        if !validation.ok {
            return Err(ConfigurationError::InvalidPipeline(validation).into());
        }

        let job_id = generate_job_id();
        let token = Arc::new(CancellationToken::new());
        self.inner.jobs.insert(
            job_id.clone(),
            LocalJob {
                status: StatusSnapshot::submitted(),
                results: None,
                log: Vec::new(),
                token: Arc::clone(&token),
            },
        );
        info!(job_id = %job_id, pipeline = %spec.name, "Local job submitted");

        tokio::spawn(Arc::clone(&self.inner).drive(job_id.clone(), spec.clone(), token));
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<StatusSnapshot> {
        self.inner
            .jobs
            .get(job_id)
            .map(|job| job.status.clone())
            .ok_or_else(|| QetlError::job_not_found(job_id))
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let token = {
            let mut job = self
                .inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QetlError::job_not_found(job_id))?;
            if job.status.is_terminal() {
                return Ok(false);
            }
            let progress = job.status.progress;
            job.set_status(StatusSnapshot::new(JobState::Cancelled, progress, CANCELLED_BY_USER));
            Arc::clone(&job.token)
        };

        token.cancel(CANCELLED_BY_USER);
        info!(job_id, "Local job cancelled");
        Ok(true)
    }

    async fn fetch_results(&self, job_id: &str) -> Result<JobResults> {
        let job = self
            .inner
            .jobs
            .get(job_id)
            .ok_or_else(|| QetlError::job_not_found(job_id))?;

        match (job.status.state, &job.results) {
            (JobState::Completed, Some(results)) => Ok(results.clone()),
            (state, _) => Err(QetlError::ResultsNotReady {
                job_id: job_id.to_string(),
                state,
            }),
        }
    }

    async fn logs(&self, job_id: &str) -> Result<Vec<String>> {
        self.inner
            .jobs
            .get(job_id)
            .map(|job| job.log.clone())
            .ok_or_else(|| QetlError::job_not_found(job_id))
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobSummary>> {
        let mut jobs: Vec<JobSummary> = self
            .inner
            .jobs
            .iter()
            .filter(|entry| state.is_none() || state == Some(entry.status.state))
            .map(|entry| JobSummary {
                job_id: entry.key().clone(),
                status: entry.status.clone(),
            })
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn instance_info(&self) -> Result<InstanceInfo> {
        Ok(InstanceInfo::new("local")
            .with_detail("max_concurrent_jobs", json!(self.inner.max_concurrent_jobs))
            .with_detail("jobs", json!(self.job_count()))
            .with_detail("active_jobs", json!(self.active_job_count())))
    }
}
