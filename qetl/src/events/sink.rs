//! Where job lifecycle events go.

use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace, Level};

/// Receives job lifecycle events.
///
/// Job handles report from inside their monitoring loops, so
/// [`EventSink::try_emit`] must return quickly and must not panic.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records an event without blocking.
    fn try_emit(&self, event_type: &str, data: Option<Value>);

    /// Records an event, waiting if the sink needs to.
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }
}

/// Discards every event. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`, with the job id as a field.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Logs at `level`. Levels above `INFO` are logged at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Logs at `INFO`.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        let job_id = job_id_of(data.as_ref()).unwrap_or_default();
        let state = data
            .as_ref()
            .and_then(|d| d.get("state"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        match self.level {
            Level::TRACE => trace!(event_type, job_id, state, data = ?data, "Job event"),
            Level::DEBUG => debug!(event_type, job_id, state, data = ?data, "Job event"),
            _ => info!(event_type, job_id, state, "Job event"),
        }
    }
}

/// One event captured by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// Event name, e.g. `job.completed`.
    pub event_type: String,
    /// The job the event concerns, when the payload names one.
    pub job_id: Option<String>,
    /// Event payload.
    pub data: Option<Value>,
    /// When the sink received the event.
    pub recorded_at: Timestamp,
}

/// Keeps every event in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Event names, oldest first.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Events concerning one job.
    #[must_use]
    pub fn for_job(&self, job_id: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets all events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        let event = RecordedEvent {
            event_type: event_type.to_string(),
            job_id: job_id_of(data.as_ref()).map(str::to_string),
            data,
            recorded_at: now_utc(),
        };
        self.events.write().push(event);
    }
}

fn job_id_of(data: Option<&Value>) -> Option<&str> {
    data.and_then(|d| d.get("job_id")).and_then(Value::as_str)
}
