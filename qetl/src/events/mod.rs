//! Lifecycle events.
//!
//! Builders and job handles report what happens to a job through an
//! [`EventSink`]. The default sink discards everything; attach a
//! [`LoggingEventSink`] or your own implementation to observe jobs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use serde_json::{json, Value};

/// A job was accepted by a runner.
pub const JOB_SUBMITTED: &str = "job.submitted";
/// A poll observed a new state.
pub const JOB_STATUS_CHANGED: &str = "job.status_changed";
/// The job completed successfully.
pub const JOB_COMPLETED: &str = "job.completed";
/// The job failed.
pub const JOB_FAILED: &str = "job.failed";
/// The job was cancelled.
pub const JOB_CANCELLED: &str = "job.cancelled";
/// A cancel request was sent to the runner.
pub const JOB_CANCEL_REQUESTED: &str = "job.cancel_requested";

/// Builds the payload shared by all job events.
pub(crate) fn job_payload(job_id: &str, fields: Value) -> Value {
    let mut payload = json!({ "job_id": job_id });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), fields) {
        target.extend(extra);
    }
    payload
}
