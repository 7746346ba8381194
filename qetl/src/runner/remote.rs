//! HTTP runner for the hosted QETL service.

use super::{InstanceInfo, RunnerClient};
use crate::config::RemoteConfig;
use crate::errors::{ConfigurationError, QetlError, Result, TransportError};
use crate::job::{JobResults, JobState, JobSummary, StatusSnapshot};
use crate::pipeline::components::ComponentInfo;
use crate::pipeline::PipelineSpec;
use crate::utils::{iso_timestamp, now_utc, parse_timestamp};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("qetl-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// Which endpoint a response came from; status codes mean different
/// things per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Submit,
    Status,
    Cancel,
    Results,
    Logs,
    List,
    Components,
    Instance,
}

impl Call {
    /// Whether the call addresses a single job, so a 404 means the job
    /// is unknown.
    fn targets_job(self) -> bool {
        matches!(self, Self::Status | Self::Cancel | Self::Results | Self::Logs)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(alias = "state")]
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    metrics: BTreeMap<String, Value>,
    #[serde(default)]
    execution_metadata: BTreeMap<String, Value>,
    #[serde(default)]
    execution_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    #[serde(alias = "id")]
    job_id: String,
    #[serde(flatten)]
    status: StatusResponse,
}

#[derive(Debug, Deserialize)]
struct JobListResponse {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct ComponentsResponse {
    #[serde(default)]
    components: Vec<ComponentInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, alias = "error", alias = "detail")]
    message: Option<String>,
    #[serde(default, alias = "state")]
    status: Option<String>,
}

/// A [`RunnerClient`] backed by the QETL REST API.
///
/// Endpoints: `POST /jobs`, `GET /jobs`, `GET /jobs/{id}`,
/// `POST /jobs/{id}/cancel`, `GET /jobs/{id}/results`, `GET /jobs/{id}/logs`,
/// `GET /components` and `GET /instance/info`, all authenticated with a
/// bearer token. Job ids are percent-encoded as single path segments.
#[derive(Clone)]
pub struct RemoteRunner {
    http: Client,
    base_url: Url,
    api_key: String,
    instance_id: String,
}

impl RemoteRunner {
    /// Creates a runner from configuration.
    ///
    /// # Errors
    ///
    /// `MissingSetting` when the API key or instance id is absent,
    /// `InvalidSetting` when the base URL cannot carry a path.
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ConfigurationError::missing_setting("api_key", "set remote.api_key or QETL_API_KEY")
        })?;
        let instance_id = config.instance_id.clone().ok_or_else(|| {
            ConfigurationError::missing_setting("instance_id", "set remote.instance_id or QETL_INSTANCE_ID")
        })?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ConfigurationError::invalid_setting("base_url", &config.base_url))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigurationError::Unsupported(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            instance_id,
        })
    }

    /// The service endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder, call: Call, job_id: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!(job_id, status = status.as_u16(), ?call, "Backend returned an error");
            return Err(map_error(call, status, job_id, &body, retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| TransportError::MalformedResponse(e.to_string()).into())
    }
}

impl fmt::Debug for RemoteRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRunner")
            .field("base_url", &self.base_url())
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RunnerClient for RemoteRunner {
    async fn submit(&self, spec: &PipelineSpec) -> Result<String> {
        let body = json!({
            "yaml_config": spec.to_yaml()?,
            "instance_id": self.instance_id,
            "priority": spec.execution.priority,
            "metadata": {
                "client_version": env!("CARGO_PKG_VERSION"),
                "submission_time": iso_timestamp(),
            },
        });

        let response: SubmitResponse = self
            .call(self.http.post(self.endpoint(&["jobs"])).json(&body), Call::Submit, "")
            .await?;
        info!(job_id = %response.job_id, pipeline = %spec.name, "Remote job submitted");
        Ok(response.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<StatusSnapshot> {
        let response: StatusResponse = self
            .call(self.http.get(self.endpoint(&["jobs", job_id])), Call::Status, job_id)
            .await?;
        status_from_response(response)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let response: CancelResponse = self
            .call(
                self.http.post(self.endpoint(&["jobs", job_id, "cancel"])),
                Call::Cancel,
                job_id,
            )
            .await?;
        Ok(response.cancelled)
    }

    async fn fetch_results(&self, job_id: &str) -> Result<JobResults> {
        let response: ResultsResponse = self
            .call(
                self.http.get(self.endpoint(&["jobs", job_id, "results"])),
                Call::Results,
                job_id,
            )
            .await?;
        Ok(results_from_response(response))
    }

    async fn logs(&self, job_id: &str) -> Result<Vec<String>> {
        let response: LogsResponse = self
            .call(
                self.http.get(self.endpoint(&["jobs", job_id, "logs"])),
                Call::Logs,
                job_id,
            )
            .await?;
        Ok(response.logs)
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobSummary>> {
        let mut url = self.endpoint(&["jobs"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(state) = state {
                query.append_pair("status", &state.to_string());
            }
        }

        let response: JobListResponse = self.call(self.http.get(url), Call::List, "").await?;
        let mut jobs = response
            .jobs
            .into_iter()
            .map(|entry| {
                Ok(JobSummary {
                    job_id: entry.job_id,
                    status: status_from_response(entry.status)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_components(&self) -> Result<Vec<ComponentInfo>> {
        let response: ComponentsResponse = self
            .call(self.http.get(self.endpoint(&["components"])), Call::Components, "")
            .await?;
        Ok(response.components)
    }

    async fn instance_info(&self) -> Result<InstanceInfo> {
        let details: BTreeMap<String, Value> = self
            .call(self.http.get(self.endpoint(&["instance", "info"])), Call::Instance, "")
            .await?;
        Ok(instance_from_response(self.base_url(), &self.instance_id, details))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn map_error(call: Call, status: StatusCode, job_id: &str, body: &str, retry_after: Option<u64>) -> QetlError {
    let detail: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = detail
        .message
        .clone()
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED => TransportError::Authentication(message).into(),
        StatusCode::FORBIDDEN => TransportError::Authorization(message).into(),
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after }.into(),
        StatusCode::NOT_FOUND if call.targets_job() => QetlError::job_not_found(job_id),
        StatusCode::CONFLICT if call == Call::Results => QetlError::ResultsNotReady {
            job_id: job_id.to_string(),
            state: detail
                .status
                .and_then(|s| s.parse().ok())
                .unwrap_or(JobState::Running),
        },
        s if call == Call::Submit && s.is_client_error() => QetlError::submission(
            detail.code.unwrap_or_else(|| format!("HTTP_{}", s.as_u16())),
            message,
        ),
        s => TransportError::Http {
            status: s.as_u16(),
            body: message,
        }
        .into(),
    }
}

fn status_from_response(response: StatusResponse) -> Result<StatusSnapshot> {
    let state: JobState = response
        .status
        .parse()
        .map_err(TransportError::MalformedResponse)?;

    // Percentages are accepted as well as fractions.
    let progress = if response.progress > 1.0 {
        response.progress / 100.0
    } else {
        response.progress
    };

    let mut snapshot = StatusSnapshot::new(state, progress, response.message);
    snapshot.updated_at = match response.updated_at.as_deref() {
        Some(raw) => parse_timestamp(raw).map_err(|e| TransportError::MalformedResponse(e.to_string()))?,
        None => now_utc(),
    };
    Ok(snapshot)
}

fn instance_from_response(endpoint: &str, instance_id: &str, mut details: BTreeMap<String, Value>) -> InstanceInfo {
    details
        .entry("instance_id".to_string())
        .or_insert_with(|| json!(instance_id));
    InstanceInfo {
        mode: "remote".to_string(),
        endpoint: Some(endpoint.to_string()),
        details,
    }
}

fn results_from_response(response: ResultsResponse) -> JobResults {
    let mut results = JobResults::new();
    results.outputs = response.outputs;
    results.logs = response.logs;
    results.metrics = response.metrics;
    results.execution_metadata = response.execution_metadata;
    if let Some(seconds) = response.execution_time {
        results
            .execution_metadata
            .insert("execution_time".to_string(), json!(seconds));
    }
    results
}
