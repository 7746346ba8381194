//! Client configuration.
//!
//! A [`ClientConfig`] selects the execution backend and carries the settings
//! of both runners. It can be built in code, read from YAML or read from
//! `QETL_*` environment variables.

use crate::errors::{ConfigurationError, Result};
use crate::job::PollConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default endpoint of the hosted QETL service.
pub const DEFAULT_BASE_URL: &str = "https://api.qetl.io/v1";

/// Where jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// In-process execution through [`LocalRunner`](crate::runner::LocalRunner).
    #[default]
    Local,
    /// The hosted service, through `RemoteRunner`.
    #[serde(alias = "cloud")]
    Remote,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "cloud" => Ok(Self::Remote),
            _ => Err(ConfigurationError::invalid_setting("mode", s)),
        }
    }
}

/// Settings of the in-process runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Jobs allowed in `Running` at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// External runner command. Without one, jobs are dry-run.
    #[serde(default)]
    pub runner_command: Option<String>,
    /// Where pipeline files for the external runner are written.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            runner_command: None,
            work_dir: None,
        }
    }
}

impl LocalConfig {
    /// Sets the concurrency limit (at least 1).
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Sets the external runner command line.
    #[must_use]
    pub fn with_runner_command(mut self, command: impl Into<String>) -> Self {
        self.runner_command = Some(command.into());
        self
    }

    /// Sets the work directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// Settings of the HTTP runner.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Service endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Compute instance the jobs are billed to.
    #[serde(default)]
    pub instance_id: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            instance_id: None,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl RemoteConfig {
    /// Sets the endpoint, without a trailing slash.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the instance id.
    #[must_use]
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }
}

/// Top-level configuration of a [`QetlClient`](crate::client::QetlClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Selected backend.
    #[serde(default)]
    pub mode: Mode,
    /// Default timeout for waiting on jobs and for HTTP requests.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Status polling cadence.
    #[serde(default)]
    pub poll: PollConfig,
    /// Local runner settings.
    #[serde(default)]
    pub local: LocalConfig,
    /// Remote runner settings.
    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_request_timeout_seconds() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            request_timeout_seconds: default_request_timeout_seconds(),
            poll: PollConfig::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a local-mode configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a local-mode configuration.
    #[must_use]
    pub fn local() -> Self {
        Self::new()
    }

    /// Creates a remote-mode configuration with credentials.
    #[must_use]
    pub fn remote(api_key: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::new()
            .with_mode(Mode::Remote)
            .with_remote(RemoteConfig::default().with_api_key(api_key).with_instance_id(instance_id))
    }

    /// Sets the mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    /// Sets the polling cadence.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the local runner settings.
    #[must_use]
    pub fn with_local(mut self, local: LocalConfig) -> Self {
        self.local = local;
        self
    }

    /// Sets the remote runner settings.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }

    /// The request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Reads the configuration from `QETL_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parses a YAML document. Missing sections take their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::new();

        if let Some(mode) = var("QETL_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(timeout) = var("QETL_TIMEOUT") {
            config.request_timeout_seconds = timeout
                .trim()
                .parse()
                .map_err(|_| ConfigurationError::invalid_setting("QETL_TIMEOUT", &timeout))?;
        }
        if let Some(key) = var("QETL_API_KEY") {
            config.remote.api_key = Some(key);
        }
        if let Some(id) = var("QETL_INSTANCE_ID") {
            config.remote.instance_id = Some(id);
        }
        if let Some(url) = var("QETL_BASE_URL") {
            config.remote = config.remote.with_base_url(url);
        }
        if let Some(command) = var("QETL_RUNNER_COMMAND") {
            config.local.runner_command = Some(command);
        }
        if let Some(dir) = var("QETL_WORK_DIR") {
            config.local.work_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QetlError;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new();
        assert_eq!(config.mode, Mode::Local);
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.local.max_concurrent_jobs, 4);
        assert_eq!(config.remote.base_url, DEFAULT_BASE_URL);
        assert!(config.remote.api_key.is_none());
    }

    #[test]
    fn test_from_env_reads_all_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("QETL_MODE", "cloud"),
            ("QETL_API_KEY", "secret"),
            ("QETL_INSTANCE_ID", "inst-1"),
            ("QETL_BASE_URL", "http://localhost:8080/v1/"),
            ("QETL_RUNNER_COMMAND", "python -m qetl.runner"),
            ("QETL_WORK_DIR", "/tmp/qetl"),
            ("QETL_TIMEOUT", "60"),
        ]))
        .unwrap();

        assert_eq!(config.mode, Mode::Remote);
        assert_eq!(config.remote.api_key.as_deref(), Some("secret"));
        assert_eq!(config.remote.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(config.remote.base_url, "http://localhost:8080/v1");
        assert_eq!(config.local.runner_command.as_deref(), Some("python -m qetl.runner"));
        assert_eq!(config.local.work_dir, Some(PathBuf::from("/tmp/qetl")));
        assert_eq!(config.request_timeout_seconds, 60);
    }

    #[test]
    fn test_from_env_empty_values_are_ignored() {
        let config = ClientConfig::from_lookup(lookup(&[("QETL_MODE", ""), ("QETL_API_KEY", "  ")])).unwrap();
        assert_eq!(config, ClientConfig::new());
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let err = ClientConfig::from_lookup(lookup(&[("QETL_TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            QetlError::Configuration(ConfigurationError::InvalidSetting { ref setting, .. }) if setting == "QETL_TIMEOUT"
        ));

        let err = ClientConfig::from_lookup(lookup(&[("QETL_MODE", "hybrid")])).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = ClientConfig::from_yaml_str(
            "mode: remote\nremote:\n  api_key: k\n  instance_id: i\npoll:\n  initial_delay_ms: 50\n",
        )
        .unwrap();

        assert_eq!(config.mode, Mode::Remote);
        assert_eq!(config.poll.initial_delay_ms, 50);
        assert_eq!(config.poll.max_delay_ms, 5_000);
        assert_eq!(config.remote.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout_seconds, 300);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = ClientConfig::remote("super-secret", "inst");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("inst"));
    }

    #[test]
    fn test_local_builder_clamps_concurrency() {
        let local = LocalConfig::default().with_max_concurrent_jobs(0);
        assert_eq!(local.max_concurrent_jobs, 1);
    }
}
