//! Submitted jobs: lifecycle states, status snapshots, results and the
//! [`Job`] handle that monitors them.

mod callbacks;
mod handle;
mod poll;
mod state;
mod status;

pub use callbacks::CompletionCallback;
pub use handle::{Job, ResultsHandle};
pub use poll::{Backoff, PollConfig};
pub use state::JobState;
pub use status::{CompletionNotice, JobResults, JobSummary, StatusSnapshot};
