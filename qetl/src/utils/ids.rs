//! Job identifiers.

use uuid::Uuid;

const JOB_ID_PREFIX: &str = "job_";

/// Generates a new job id of the form `job_<32 hex digits>`.
///
/// Ids are UUID v7 based, so they sort by creation time.
#[must_use]
pub fn generate_job_id() -> String {
    format!("{JOB_ID_PREFIX}{}", Uuid::now_v7().simple())
}

/// Returns true if `id` has the shape produced by [`generate_job_id`].
#[must_use]
pub fn is_job_id(id: &str) -> bool {
    id.strip_prefix(JOB_ID_PREFIX)
        .and_then(|hex| Uuid::try_parse(hex).ok())
        .is_some()
}
