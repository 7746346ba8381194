//! Pipeline definitions and their serialized form.

use super::validation::{validate_spec, ValidationResult};
use crate::errors::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Free-form configuration attached to inputs, steps and outputs.
pub type ConfigMap = BTreeMap<String, serde_json::Value>;

/// Default pipeline name used by fresh builders.
pub const DEFAULT_PIPELINE_NAME: &str = "Programmatic Pipeline";
/// Default pipeline version.
pub const DEFAULT_PIPELINE_VERSION: &str = "1.0";
/// Source type meaning "let the runner detect it".
pub const AUTO_SOURCE_TYPE: &str = "auto";
/// Default output format.
pub const DEFAULT_OUTPUT_FORMAT: &str = "json";
/// Default job priority.
pub const DEFAULT_PRIORITY: i64 = 50;
/// Default job timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 3600;

/// An input data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSource {
    /// Source identifier, unique among inputs.
    pub name: String,
    /// Data source type (csv, json, pdb, sdf, ...).
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
    /// Location of the data.
    pub path: String,
    /// Source-specific configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: ConfigMap,
}

impl InputSource {
    /// Creates an input source with an auto-detected type.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: default_source_type(),
            path: path.into(),
            config: ConfigMap::new(),
        }
    }

    /// Sets the source type.
    #[must_use]
    pub fn with_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
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
}

/// One named transformation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStep {
    /// Unique step name.
    pub name: String,
    /// Backend component identifier.
    pub component: String,
    /// Component configuration.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: ConfigMap,
    /// Names of steps this step depends on.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<String>,
}

impl TransformStep {
    /// Creates a step with no configuration or dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            config: ConfigMap::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    /// Replaces the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }
}

/// An output destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output identifier, unique among outputs.
    pub name: String,
    /// Destination path.
    pub path: String,
    /// Output format.
    #[serde(default = "default_output_format")]
    pub format: String,
    /// Output-specific configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: ConfigMap,
}

impl OutputSpec {
    /// Creates a JSON output.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format: default_output_format(),
            config: ConfigMap::new(),
        }
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }
}

/// Execution parameters for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Priority in `0..=100`, higher runs first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Maximum execution time in seconds.
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_seconds: i64,
    /// Notification endpoints.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub notifications: BTreeSet<String>,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            notifications: BTreeSet::new(),
        }
    }
}

impl ExecutionParams {
    /// Creates the default parameters (priority 50, one hour).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Adds a notification endpoint.
    #[must_use]
    pub fn with_notification(mut self, endpoint: impl Into<String>) -> Self {
        self.notifications.insert(endpoint.into());
        self
    }
}

/// Definition of an entire pipeline.
///
/// The serde representation is the interchange format shared with the CLI
/// and the backends: `pipeline_name`, `version`, `input_sources`,
/// `transformations`, `outputs` and `execution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// The pipeline name.
    #[serde(rename = "pipeline_name")]
    pub name: String,
    /// The pipeline version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input sources, in declaration order.
    #[serde(rename = "input_sources", default)]
    pub inputs: Vec<InputSource>,
    /// Transformation steps, in declaration order.
    #[serde(
        rename = "transformations",
        default,
        deserialize_with = "deserialize_steps"
    )]
    pub steps: Vec<TransformStep>,
    /// Outputs, in declaration order.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Execution parameters.
    #[serde(default)]
    pub execution: ExecutionParams,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self::new(DEFAULT_PIPELINE_NAME)
    }
}

impl PipelineSpec {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            inputs: Vec::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
            execution: ExecutionParams::default(),
        }
    }

    /// Validates the pipeline. Never mutates it.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        validate_spec(self)
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&TransformStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Serializes to the YAML interchange format.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parses the YAML interchange format.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serializes to JSON, as sent to remote runners.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reads a YAML pipeline file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

/// Wire shape of a transformation, where the name may be omitted.
#[derive(Deserialize)]
struct RawTransformStep {
    #[serde(default)]
    name: Option<String>,
    component: String,
    #[serde(default)]
    config: ConfigMap,
    #[serde(default)]
    dependencies: BTreeSet<String>,
}

fn deserialize_steps<'de, D>(deserializer: D) -> std::result::Result<Vec<TransformStep>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<RawTransformStep> = Vec::deserialize(deserializer)?;
    let mut taken: BTreeSet<String> = raw.iter().filter_map(|s| s.name.clone()).collect();

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let name = step.name.unwrap_or_else(|| {
                let generated = unique_step_name(&step.component, index + 1, &taken);
                taken.insert(generated.clone());
                generated
            });
            TransformStep {
                name,
                component: step.component,
                config: step.config,
                dependencies: step.dependencies,
            }
        })
        .collect())
}

/// Generates `{component}_{n}`, bumping `n` until the name is free.
pub(crate) fn unique_step_name(component: &str, start: usize, taken: &BTreeSet<String>) -> String {
    let mut counter = start;
    loop {
        let candidate = format!("{component}_{counter}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn default_source_type() -> String {
    AUTO_SOURCE_TYPE.to_string()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

fn default_version() -> String {
    DEFAULT_PIPELINE_VERSION.to_string()
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECONDS
}
