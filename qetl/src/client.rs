//! Config-driven entry point.

use crate::config::{ClientConfig, Mode};
use crate::errors::Result;
use crate::events::{EventSink, NoOpEventSink};
use crate::job::{Job, JobState, JobSummary, StatusSnapshot};
use crate::pipeline::components::ComponentInfo;
use crate::pipeline::{JobBuilder, PipelineSpec, ValidationResult};
use crate::runner::{InstanceInfo, LocalRunner, RunnerClient};
use futures::future::join_all;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Creates, submits and looks up jobs against the configured backend.
///
/// ```no_run
/// use qetl::prelude::*;
///
/// # async fn run() -> qetl::Result<()> {
/// let client = QetlClient::new(ClientConfig::local())?;
/// let job = client.submit_yaml("pipeline.yaml").await?;
/// let results = job.get_results(client.default_timeout()).await?;
/// println!("{:?}", results.outputs);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct QetlClient {
    config: ClientConfig,
    runner: Arc<dyn RunnerClient>,
    events: Arc<dyn EventSink>,
}

impl QetlClient {
    /// Creates a client for the mode selected in `config`.
    ///
    /// # Errors
    ///
    /// `MissingSetting` when remote mode lacks credentials, `Unsupported`
    /// when remote mode is requested without the `remote` feature.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runner: Arc<dyn RunnerClient> = match config.mode {
            Mode::Local => Arc::new(LocalRunner::from_config(&config.local)?),
            Mode::Remote => remote_runner(&config)?,
        };
        info!(mode = %config.mode, "QETL client initialised");
        Ok(Self::with_runner(config, runner))
    }

    /// Creates a client from `QETL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client around an existing runner. The mode in `config` is
    /// kept for reporting only.
    #[must_use]
    pub fn with_runner(config: ClientConfig, runner: Arc<dyn RunnerClient>) -> Self {
        Self {
            config,
            runner,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sends lifecycle events of every job to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The selected mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// The runner jobs are submitted to.
    #[must_use]
    pub fn runner(&self) -> Arc<dyn RunnerClient> {
        Arc::clone(&self.runner)
    }

    /// The configured wait timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Starts building a new job.
    #[must_use]
    pub fn create_job(&self) -> JobBuilder {
        self.builder_for(PipelineSpec::default())
    }

    /// Validates and submits a complete spec.
    pub async fn submit_spec(&self, spec: PipelineSpec) -> Result<Job> {
        self.builder_for(spec).submit().await
    }

    /// Loads a pipeline file and submits it.
    pub async fn submit_yaml(&self, path: impl AsRef<Path>) -> Result<Job> {
        let spec = PipelineSpec::from_yaml_file(path)?;
        self.submit_spec(spec).await
    }

    /// Loads a pipeline file and validates it without submitting.
    pub fn validate_yaml(&self, path: impl AsRef<Path>) -> Result<ValidationResult> {
        Ok(PipelineSpec::from_yaml_file(path)?.validate())
    }

    /// Looks up an existing job and refreshes its status once.
    ///
    /// # Errors
    ///
    /// `JobNotFound` when the runner does not know the id.
    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        let job = Job::from_parts(
            job_id.to_string(),
            Arc::clone(&self.runner),
            self.config.poll.clone(),
            Arc::clone(&self.events),
        );
        job.get_status().await?;
        Ok(job)
    }

    /// Lists jobs known to the backend, ordered by id, optionally only
    /// those in `state`.
    ///
    /// Use [`QetlClient::get_job`] to monitor one of them.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobSummary>> {
        self.runner.list_jobs(state, limit).await
    }

    /// Components the backend can run.
    pub async fn list_components(&self) -> Result<Vec<ComponentInfo>> {
        self.runner.list_components().await
    }

    /// Describes the backend this client talks to.
    pub async fn instance_info(&self) -> Result<InstanceInfo> {
        self.runner.instance_info().await
    }

    /// Waits for several jobs concurrently, sharing one timeout.
    ///
    /// Outcomes are returned in the order of `jobs`.
    pub async fn wait_all(&self, jobs: &[Job], timeout: Duration) -> Vec<Result<StatusSnapshot>> {
        join_all(jobs.iter().map(|job| job.wait_until_complete(timeout))).await
    }

    fn builder_for(&self, spec: PipelineSpec) -> JobBuilder {
        JobBuilder::from_spec(Arc::clone(&self.runner), spec)
            .with_poll_config(self.config.poll.clone())
            .with_event_sink(Arc::clone(&self.events))
    }
}

impl fmt::Debug for QetlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QetlClient")
            .field("mode", &self.config.mode)
            .field("request_timeout_seconds", &self.config.request_timeout_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "remote")]
fn remote_runner(config: &ClientConfig) -> Result<Arc<dyn RunnerClient>> {
    let runner = crate::runner::RemoteRunner::new(&config.remote, config.request_timeout())?;
    Ok(Arc::new(runner))
}

#[cfg(not(feature = "remote"))]
fn remote_runner(_config: &ClientConfig) -> Result<Arc<dyn RunnerClient>> {
    Err(crate::errors::ConfigurationError::Unsupported(
        "remote mode requires the `remote` feature".to_string(),
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigurationError, QetlError};
    use crate::events::CollectingEventSink;
    use crate::job::{JobState, PollConfig};
    use crate::pipeline::{InputSource, TransformOptions};
    use crate::testing::{drug_discovery_pipeline, ScriptedRunner};
    use std::io::Write;

    fn scripted_client(runner: Arc<ScriptedRunner>) -> QetlClient {
        QetlClient::with_runner(
            ClientConfig::local().with_poll(PollConfig::new().with_initial_delay_ms(1)),
            runner,
        )
    }

    #[test]
    fn test_remote_mode_requires_credentials() {
        let err = QetlClient::new(ClientConfig::new().with_mode(Mode::Remote)).unwrap_err();
        assert!(matches!(
            err,
            QetlError::Configuration(ConfigurationError::MissingSetting { .. })
                | QetlError::Configuration(ConfigurationError::Unsupported(_))
        ));
    }

    #[cfg(feature = "remote")]
    #[test]
    fn test_remote_mode_with_credentials() {
        let client = QetlClient::new(ClientConfig::remote("key", "inst")).unwrap();
        assert_eq!(client.mode(), Mode::Remote);
    }

    #[test]
    fn test_local_mode_default() {
        let client = QetlClient::new(ClientConfig::local()).unwrap();
        assert_eq!(client.mode(), Mode::Local);
        assert_eq!(client.default_timeout(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_create_job_uses_client_runner_and_events() {
        let runner = Arc::new(ScriptedRunner::new());
        let events = Arc::new(CollectingEventSink::new());
        let client = scripted_client(Arc::clone(&runner)).with_event_sink(events.clone());

        let job = client
            .create_job()
            .add_input_source(InputSource::new("raw", "/data/raw.csv"))
            .unwrap()
            .add_transformation("wave_encoder", TransformOptions::new())
            .unwrap()
            .submit()
            .await
            .unwrap();

        assert_eq!(job.id(), "job_1");
        assert_eq!(runner.submit_count(), 1);
        assert_eq!(events.events_of_type("job.submitted").len(), 1);
    }

    #[tokio::test]
    async fn test_submit_and_validate_yaml_file() {
        let runner = Arc::new(ScriptedRunner::new());
        let client = scripted_client(Arc::clone(&runner));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(drug_discovery_pipeline().to_yaml().unwrap().as_bytes())
            .unwrap();

        assert!(client.validate_yaml(file.path()).unwrap().ok);
        let job = client.submit_yaml(file.path()).await.unwrap();
        assert_eq!(job.state(), JobState::Submitted);
        assert_eq!(runner.submitted_specs()[0], drug_discovery_pipeline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_keeps_order() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status(
            "job_a",
            vec![
                StatusSnapshot::new(JobState::Running, 0.4, ""),
                StatusSnapshot::new(JobState::Completed, 1.0, "done"),
            ],
        );
        runner.script_status("job_b", vec![StatusSnapshot::new(JobState::Running, 0.4, "")]);
        let client = scripted_client(Arc::clone(&runner));

        let jobs = vec![
            client.get_job("job_a").await.unwrap(),
            client.get_job("job_b").await.unwrap(),
        ];
        let outcomes = client.wait_all(&jobs, Duration::from_secs(1)).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].as_ref().unwrap().state, JobState::Completed);
        assert!(matches!(outcomes[1], Err(QetlError::JobTimeout { .. })));
    }

    #[tokio::test]
    async fn test_get_job() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status(
            "job_42",
            vec![StatusSnapshot::new(JobState::Running, 0.5, "halfway")],
        );
        let client = scripted_client(Arc::clone(&runner));

        let job = client.get_job("job_42").await.unwrap();
        assert_eq!(job.state(), JobState::Running);

        assert!(matches!(
            client.get_job("job_missing").await,
            Err(QetlError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_listing_components_and_instance() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_2", vec![StatusSnapshot::new(JobState::Running, 0.5, "")]);
        runner.script_status("job_1", vec![StatusSnapshot::new(JobState::Completed, 1.0, "")]);
        let client = scripted_client(Arc::clone(&runner));
        client.get_job("job_1").await.unwrap();
        client.get_job("job_2").await.unwrap();

        let all = client.list_jobs(None, 100).await.unwrap();
        assert_eq!(all.iter().map(|j| j.job_id.as_str()).collect::<Vec<_>>(), vec!["job_1", "job_2"]);

        let completed = client.list_jobs(Some(JobState::Completed), 100).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status.state, JobState::Completed);

        let names: Vec<String> = client
            .list_components()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"encoder".to_string()));

        assert_eq!(client.instance_info().await.unwrap().mode, "scripted");
    }

    #[tokio::test]
    async fn test_local_client_reports_instance() {
        let client = QetlClient::new(ClientConfig::local()).unwrap();
        let info = client.instance_info().await.unwrap();
        assert_eq!(info.mode, "local");
        assert!(info.endpoint.is_none());
        assert!(client.list_jobs(None, 10).await.unwrap().is_empty());
    }
}
