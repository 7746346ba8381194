//! Completion callback dispatch.
//!
//! Each job owns at most one dispatcher task, created on first use. Batches
//! of callbacks are queued on an unbounded channel and run sequentially in
//! the order they were queued, so callbacks never overlap and always see
//! registration order. Outside a runtime, batches run on the caller's
//! thread instead. A panicking callback is logged and skipped.

use super::CompletionNotice;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A callback invoked once the job reaches a terminal state.
pub type CompletionCallback = Arc<dyn Fn(&CompletionNotice) + Send + Sync>;

struct Batch {
    callbacks: Vec<CompletionCallback>,
    notice: CompletionNotice,
}

/// Sends callback batches to the per-job dispatcher task.
pub(crate) struct CallbackDispatcher {
    tx: Option<mpsc::UnboundedSender<Batch>>,
}

impl CallbackDispatcher {
    /// Starts a dispatcher on the current Tokio runtime, if there is one.
    ///
    /// Without a runtime, batches run inline on the calling thread.
    pub(crate) fn start() -> Self {
        let Ok(handle) = Handle::try_current() else {
            return Self { tx: None };
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Batch>();
        handle.spawn(async move {
            while let Some(batch) = rx.recv().await {
                run_batch(&batch.callbacks, &batch.notice);
            }
        });

        Self { tx: Some(tx) }
    }

    /// Queues callbacks for execution with the given notice.
    ///
    /// Without a dispatcher task the batch is handed back, and the caller
    /// runs it once it no longer holds any job lock.
    #[must_use]
    pub(crate) fn dispatch(
        &self,
        callbacks: Vec<CompletionCallback>,
        notice: CompletionNotice,
    ) -> Option<InlineBatch> {
        if callbacks.is_empty() {
            return None;
        }

        let batch = Batch { callbacks, notice };
        match &self.tx {
            Some(tx) => match tx.send(batch) {
                Ok(()) => None,
                Err(mpsc::error::SendError(batch)) => {
                    debug!(job_id = %batch.notice.job_id, "Dispatcher gone, running callbacks inline");
                    Some(InlineBatch(batch))
                }
            },
            None => Some(InlineBatch(batch)),
        }
    }
}

/// A batch that must run on the calling thread.
pub(crate) struct InlineBatch(Batch);

impl InlineBatch {
    pub(crate) fn run(self) {
        run_batch(&self.0.callbacks, &self.0.notice);
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("spawned", &self.tx.is_some())
            .finish()
    }
}

fn run_batch(callbacks: &[CompletionCallback], notice: &CompletionNotice) {
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(e) = catch_unwind(AssertUnwindSafe(|| callback(notice))) {
            warn!(
                job_id = %notice.job_id,
                callback_index = index,
                "Completion callback panicked: {:?}",
                e
            );
        }
    }
}
