//! Identifier and timestamp helpers shared by the runners and job handles.

mod ids;
pub mod timestamps;

pub use ids::{generate_job_id, is_job_id};
pub use timestamps::{iso_timestamp, now_utc, parse_timestamp, Timestamp, TimestampError};
