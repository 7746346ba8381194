//! Fluent job construction.

use super::spec::{unique_step_name, ConfigMap, ExecutionParams, InputSource, OutputSpec, PipelineSpec, TransformStep};
use super::validation::ValidationResult;
use crate::errors::{ConfigurationError, Result};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::job::{CompletionCallback, CompletionNotice, Job, PollConfig};
use crate::observability::SpanTimer;
use crate::runner::RunnerClient;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Optional settings for [`JobBuilder::add_transformation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    /// Step name; generated as `{component}_{n}` when absent.
    pub name: Option<String>,
    /// Component configuration.
    pub config: ConfigMap,
    /// Steps this one depends on.
    pub dependencies: BTreeSet<String>,
}

impl TransformOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with an explicit step name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    /// Sets the step name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    /// Adds one configuration entry.
    #[must_use]
    pub fn with_config_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Accumulates a pipeline and submits it as a job.
///
/// Mutators consume the builder and hand it back, so calls chain with `?`.
/// Name collisions are rejected as they happen; dependency references and
/// cycles are checked by [`JobBuilder::validate`] and again by
/// [`JobBuilder::submit`]. Cloning a builder forks the pipeline.
///
/// ```no_run
/// # async fn demo(runner: std::sync::Arc<dyn qetl::runner::RunnerClient>) -> qetl::Result<()> {
/// use qetl::prelude::*;
///
/// let job = JobBuilder::new(runner)
///     .set_name("Drug Discovery")
///     .add_input_source(InputSource::new("drug_data", "s3://bucket/compounds.csv"))?
///     .add_wave_encoder("molecular_orbital", TransformOptions::named("encode"))?
///     .add_quantum_homology_analyzer(4, "high", TransformOptions::new().with_dependency("encode"))?
///     .add_output(OutputSpec::new("report", "results/report.json"))?
///     .submit()
///     .await?;
/// let results = job.get_results(std::time::Duration::from_secs(600)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobBuilder {
    spec: PipelineSpec,
    runner: Arc<dyn RunnerClient>,
    poll: PollConfig,
    events: Arc<dyn EventSink>,
    callbacks: Vec<CompletionCallback>,
}

impl JobBuilder {
    /// Creates a builder for an empty pipeline.
    #[must_use]
    pub fn new(runner: Arc<dyn RunnerClient>) -> Self {
        Self::from_spec(runner, PipelineSpec::default())
    }

    /// Creates a builder seeded with an existing pipeline.
    #[must_use]
    pub fn from_spec(runner: Arc<dyn RunnerClient>, spec: PipelineSpec) -> Self {
        Self {
            spec,
            runner,
            poll: PollConfig::default(),
            events: Arc::new(NoOpEventSink),
            callbacks: Vec::new(),
        }
    }

    /// Sets the polling cadence of submitted jobs.
    #[must_use]
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the sink that receives lifecycle events of submitted jobs.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    /// Sets the pipeline version.
    #[must_use]
    pub fn set_version(mut self, version: impl Into<String>) -> Self {
        self.spec.version = version.into();
        self
    }

    /// Sets the pipeline description.
    #[must_use]
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = Some(description.into());
        self
    }

    /// Adds an input source.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if an input with the same name exists.
    pub fn add_input_source(mut self, source: InputSource) -> Result<Self> {
        if self.spec.inputs.iter().any(|i| i.name == source.name) {
            return Err(ConfigurationError::duplicate_name("input_sources", source.name).into());
        }
        self.spec.inputs.push(source);
        Ok(self)
    }

    /// Adds a transformation step.
    ///
    /// Without an explicit name the step is called `{component}_{n}`, where
    /// `n` is its 1-based position, bumped past names already in use.
    /// Dependencies are not checked here.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if an explicit name is already taken.
    pub fn add_transformation(
        mut self,
        component: impl Into<String>,
        options: TransformOptions,
    ) -> Result<Self> {
        let component = component.into();
        let taken: BTreeSet<String> = self.spec.steps.iter().map(|s| s.name.clone()).collect();

        let name = match options.name {
            Some(name) if taken.contains(&name) => {
                return Err(ConfigurationError::duplicate_name("transformations", name).into());
            }
            Some(name) => name,
            None => unique_step_name(&component, self.spec.steps.len() + 1, &taken),
        };

        self.spec.steps.push(
            TransformStep::new(name, component)
                .with_config(options.config)
                .with_dependencies(options.dependencies),
        );
        Ok(self)
    }

    /// Adds an output.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if an output with the same name exists.
    pub fn add_output(mut self, output: OutputSpec) -> Result<Self> {
        if self.spec.outputs.iter().any(|o| o.name == output.name) {
            return Err(ConfigurationError::duplicate_name("outputs", output.name).into());
        }
        self.spec.outputs.push(output);
        Ok(self)
    }

    /// Replaces the execution parameters wholesale.
    #[must_use]
    pub fn set_execution_params(mut self, params: ExecutionParams) -> Self {
        self.spec.execution = params;
        self
    }

    /// Registers a completion callback that is carried onto the submitted
    /// job.
    #[must_use]
    pub fn on_completion<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CompletionNotice) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Validates the pipeline assembled so far.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        self.spec.validate()
    }

    /// Returns an owned snapshot of the pipeline.
    #[must_use]
    pub fn spec(&self) -> PipelineSpec {
        self.spec.clone()
    }

    /// Serializes the pipeline to YAML. Callable at any time.
    ///
    /// # Errors
    ///
    /// `Serialization` if a config value cannot be represented in YAML.
    pub fn to_serialized(&self) -> Result<String> {
        self.spec.to_yaml()
    }

    /// Writes the YAML form of the pipeline to `path`.
    ///
    /// # Errors
    ///
    /// `Serialization` or `Io`.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = self.to_serialized()?;
        std::fs::write(path.as_ref(), yaml)?;
        info!(pipeline = %self.spec.name, path = %path.as_ref().display(), "Pipeline saved");
        Ok(())
    }

    /// Validates and submits the pipeline.
    ///
    /// The runner is not contacted when validation fails.
    ///
    /// # Errors
    ///
    /// `Configuration(InvalidPipeline)` carrying every validation issue, or
    /// whatever the runner returns.
    pub async fn submit(self) -> Result<Job> {
        let validation = self.spec.validate();
        if !validation.ok {
            warn!(
                pipeline = %self.spec.name,
                issues = validation.errors.len(),
                "Refusing to submit invalid pipeline: {}",
                validation
            );
            return Err(ConfigurationError::InvalidPipeline(validation).into());
        }

        let timer = SpanTimer::start("submit");
        let job_id = self.runner.submit(&self.spec).await?;
        let elapsed_ms = timer.finish();

        info!(
            job_id = %job_id,
            pipeline = %self.spec.name,
            steps = self.spec.steps.len(),
            elapsed_ms,
            "Job submitted"
        );
        self.events.try_emit(
            events::JOB_SUBMITTED,
            Some(events::job_payload(
                &job_id,
                json!({
                    "pipeline": self.spec.name,
                    "version": self.spec.version,
                    "steps": self.spec.steps.len(),
                }),
            )),
        );

        let job = Job::from_parts(job_id, self.runner, self.poll, self.events);
        for callback in self.callbacks {
            job.register_callback(callback);
        }
        Ok(job)
    }
}

impl fmt::Debug for JobBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBuilder")
            .field("spec", &self.spec)
            .field("poll", &self.poll)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for JobBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobBuilder(inputs={}, transformations={})",
            self.spec.inputs.len(),
            self.spec.steps.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QetlError;
    use crate::events::CollectingEventSink;
    use crate::job::{JobState, StatusSnapshot};
    use crate::pipeline::ValidationIssueKind;
    use crate::testing::ScriptedRunner;
    use pretty_assertions::assert_eq;

    fn builder(runner: &Arc<ScriptedRunner>) -> JobBuilder {
        JobBuilder::new(Arc::clone(runner) as Arc<dyn RunnerClient>)
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = builder(&runner)
            .add_input_source(InputSource::new("drug_data", "a.csv"))
            .unwrap()
            .add_input_source(InputSource::new("drug_data", "b.csv"))
            .unwrap_err();

        assert!(matches!(
            err,
            QetlError::Configuration(ConfigurationError::DuplicateName { ref name, .. }) if name == "drug_data"
        ));
    }

    #[test]
    fn test_duplicate_output_and_step_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .add_output(OutputSpec::new("out", "o.json"))
            .unwrap();
        assert!(b.clone().add_output(OutputSpec::new("out", "p.json")).is_err());

        let b = b.add_transformation("comp", TransformOptions::named("a")).unwrap();
        assert!(b.add_transformation("other", TransformOptions::named("a")).is_err());
    }

    #[test]
    fn test_generated_step_names() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .add_transformation("wave_encoder", TransformOptions::new())
            .unwrap()
            .add_transformation("wave_encoder", TransformOptions::named("wave_encoder_3"))
            .unwrap()
            .add_transformation("wave_encoder", TransformOptions::new())
            .unwrap();

        let names: Vec<String> = b.spec().steps.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["wave_encoder_1", "wave_encoder_3", "wave_encoder_4"]);
    }

    #[test]
    fn test_dependencies_checked_only_on_validate() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .add_transformation("comp", TransformOptions::named("b").with_dependency("a"))
            .unwrap();

        let result = b.validate();
        assert!(!result.ok);
        assert_eq!(result.of_kind(ValidationIssueKind::UnknownDependency)[0].subjects, vec!["a"]);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .add_input_source(InputSource::new("in", "in.csv"))
            .unwrap();
        let snapshot = b.to_serialized().unwrap();
        let spec = b.spec();

        let b = b.add_output(OutputSpec::new("out", "out.json")).unwrap();

        assert_eq!(PipelineSpec::from_yaml(&snapshot).unwrap(), spec);
        assert!(spec.outputs.is_empty());
        assert_eq!(b.spec().outputs.len(), 1);
    }

    #[test]
    fn test_set_execution_params_overwrites() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .set_execution_params(ExecutionParams::new().with_priority(90).with_notification("ops@example.com"))
            .set_execution_params(ExecutionParams::new().with_priority(10));

        let spec = b.spec();
        assert_eq!(spec.execution.priority, 10);
        assert!(spec.execution.notifications.is_empty());
    }

    #[test]
    fn test_metadata_setters_and_display() {
        let runner = Arc::new(ScriptedRunner::new());
        let b = builder(&runner)
            .set_name("Drug Discovery")
            .set_version("2.1")
            .set_description("demo")
            .add_input_source(InputSource::new("in", "in.csv"))
            .unwrap();

        let spec = b.spec();
        assert_eq!(spec.name, "Drug Discovery");
        assert_eq!(spec.version, "2.1");
        assert_eq!(spec.description.as_deref(), Some("demo"));
        assert_eq!(b.to_string(), "JobBuilder(inputs=1, transformations=0)");
    }

    #[test]
    fn test_save_yaml() {
        let runner = Arc::new(ScriptedRunner::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        let b = builder(&runner)
            .add_input_source(InputSource::new("in", "in.csv"))
            .unwrap()
            .add_transformation("comp", TransformOptions::new())
            .unwrap();

        b.save_yaml(&path).unwrap();

        assert_eq!(PipelineSpec::from_yaml_file(&path).unwrap(), b.spec());
    }

    #[tokio::test]
    async fn test_invalid_submit_makes_no_runner_call() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = builder(&runner)
            .add_transformation("comp", TransformOptions::named("a").with_dependency("b"))
            .unwrap()
            .add_transformation("comp", TransformOptions::named("b").with_dependency("a"))
            .unwrap()
            .submit()
            .await
            .unwrap_err();

        match err {
            QetlError::Configuration(ConfigurationError::InvalidPipeline(result)) => {
                assert!(result.has(ValidationIssueKind::CyclicDependency));
            }
            other => panic!("expected InvalidPipeline, got {other:?}"),
        }
        assert_eq!(runner.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_returns_submitted_job_and_emits_event() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_default_script(vec![StatusSnapshot::new(JobState::Queued, 0.1, "")]),
        );
        let sink = Arc::new(CollectingEventSink::new());
        let job = builder(&runner)
            .with_event_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .add_input_source(InputSource::new("in", "in.csv"))
            .unwrap()
            .add_transformation("comp", TransformOptions::new())
            .unwrap()
            .submit()
            .await
            .unwrap();

        assert_eq!(job.id(), "job_1");
        assert_eq!(job.state(), JobState::Submitted);
        assert_eq!(runner.submit_count(), 1);
        assert_eq!(runner.poll_count(), 0);

        let submitted = sink.events_of_type(events::JOB_SUBMITTED);
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job_id.as_deref(), Some("job_1"));
    }

    #[tokio::test]
    async fn test_runner_rejection_propagates() {
        let runner = Arc::new(ScriptedRunner::new().with_rejection("QUOTA", "quota exceeded"));
        let err = builder(&runner)
            .add_transformation("comp", TransformOptions::new())
            .unwrap()
            .submit()
            .await
            .unwrap_err();

        assert_eq!(err.code(), "SUBMISSION_ERROR");
        assert!(!err.is_local());
    }
}
