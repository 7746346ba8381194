//! The submitted-job handle.

use super::callbacks::{CallbackDispatcher, CompletionCallback};
use super::{CompletionNotice, JobResults, JobState, PollConfig, StatusSnapshot};
use crate::errors::{QetlError, Result};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::runner::RunnerClient;
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A job accepted by a runner.
///
/// `Job` is a cheap handle: clones share the cached status, results and
/// callbacks. The cached status only changes when a poll observes a legal
/// transition, and polls happen only inside [`Job::get_status`],
/// [`Job::get_results`] and [`Job::wait_until_complete`].
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

struct JobInner {
    id: String,
    runner: Arc<dyn RunnerClient>,
    poll: PollConfig,
    events: Arc<dyn EventSink>,
    results: OnceCell<JobResults>,
    shared: Mutex<Shared>,
}

struct Shared {
    last_status: StatusSnapshot,
    callbacks: Vec<CompletionCallback>,
    notice: Option<CompletionNotice>,
    dispatcher: Option<CallbackDispatcher>,
}

impl Job {
    /// Attaches to an existing job id with default polling and no events.
    ///
    /// The cached status starts as `Submitted` until the first poll.
    #[must_use]
    pub fn attach(id: impl Into<String>, runner: Arc<dyn RunnerClient>) -> Self {
        Self::from_parts(id.into(), runner, PollConfig::default(), Arc::new(NoOpEventSink))
    }

    pub(crate) fn from_parts(
        id: String,
        runner: Arc<dyn RunnerClient>,
        poll: PollConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id,
                runner,
                poll,
                events,
                results: OnceCell::new(),
                shared: Mutex::new(Shared {
                    last_status: StatusSnapshot::submitted(),
                    callbacks: Vec::new(),
                    notice: None,
                    dispatcher: None,
                }),
            }),
        }
    }

    /// The runner-assigned job id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The cached status. Never contacts the runner.
    #[must_use]
    pub fn last_status(&self) -> StatusSnapshot {
        self.inner.shared.lock().last_status.clone()
    }

    /// The cached state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.inner.shared.lock().last_status.state
    }

    /// Returns true if the cached status is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if the cached status is `Completed`.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.state().is_success()
    }

    /// Results cached by an earlier call, if any.
    #[must_use]
    pub fn cached_results(&self) -> Option<JobResults> {
        self.inner.results.get().cloned()
    }

    /// Polls the runner once and updates the cached status.
    ///
    /// # Errors
    ///
    /// Runner errors are returned unchanged. A backwards move or an exit
    /// from a terminal state yields `UnexpectedState` and leaves the cached
    /// status untouched.
    pub async fn get_status(&self) -> Result<StatusSnapshot> {
        let snapshot = self.inner.runner.poll(&self.inner.id).await?;
        self.observe(snapshot).await
    }

    /// Waits for a terminal state and returns the job's results.
    ///
    /// Polls with capped exponential backoff. The elapsed time is checked
    /// against `timeout` before every poll, so a zero timeout fails at once
    /// unless the cached status is already terminal. Timing out does not
    /// cancel the job.
    ///
    /// # Errors
    ///
    /// `JobFailed`, `JobCancelled`, `JobTimeout`, or any poll error.
    pub async fn get_results(&self, timeout: Duration) -> Result<JobResults> {
        let snapshot = self.wait_until_complete(timeout).await?;
        self.conclude(&snapshot).await
    }

    /// Runs [`Job::get_results`] on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn get_results_when_done(&self, timeout: Duration) -> ResultsHandle {
        let job = self.clone();
        ResultsHandle {
            job_id: self.inner.id.clone(),
            handle: tokio::spawn(async move { job.get_results(timeout).await }),
        }
    }

    /// Waits for a terminal state and returns its snapshot without fetching
    /// results.
    ///
    /// # Errors
    ///
    /// `JobTimeout`, or any poll error.
    pub async fn wait_until_complete(&self, timeout: Duration) -> Result<StatusSnapshot> {
        let started = Instant::now();
        let mut backoff = self.inner.poll.backoff();

        loop {
            let cached = self.last_status();
            if cached.is_terminal() {
                return Ok(cached);
            }
            if started.elapsed() >= timeout {
                warn!(job_id = %self.inner.id, state = %cached.state, ?timeout, "Timed out waiting for job");
                return Err(QetlError::JobTimeout {
                    job_id: self.inner.id.clone(),
                    timeout,
                    last_state: cached.state,
                });
            }

            let snapshot = self.get_status().await?;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            let delay = backoff.next_delay(remaining);
            debug!(job_id = %self.inner.id, ?delay, "Waiting before next poll");
            tokio::time::sleep(delay).await;
        }
    }

    /// Requests cancellation.
    ///
    /// Returns false without contacting the runner when the cached status is
    /// terminal. Otherwise returns the runner's acknowledgement. The cached
    /// status is never changed; a later poll observes `Cancelled`.
    ///
    /// # Errors
    ///
    /// Any runner error.
    pub async fn cancel(&self) -> Result<bool> {
        let cached = self.state();
        if cached.is_terminal() {
            debug!(job_id = %self.inner.id, state = %cached, "Cancel ignored for finished job");
            return Ok(false);
        }

        self.inner.events.try_emit(
            events::JOB_CANCEL_REQUESTED,
            Some(events::job_payload(&self.inner.id, json!({ "state": cached }))),
        );
        let acknowledged = self.inner.runner.cancel(&self.inner.id).await?;
        info!(job_id = %self.inner.id, acknowledged, "Cancel requested");
        Ok(acknowledged)
    }

    /// Fetches the job's execution log lines from the runner.
    ///
    /// # Errors
    ///
    /// Any runner error.
    pub async fn logs(&self) -> Result<Vec<String>> {
        self.inner.runner.logs(&self.inner.id).await
    }

    /// Registers a callback invoked once the job reaches a terminal state.
    ///
    /// Registering after the terminal state was observed schedules the
    /// callback immediately. Callbacks run one at a time, in registration
    /// order, and a panic in one does not affect the others.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: Fn(&CompletionNotice) + Send + Sync + 'static,
    {
        self.register_callback(Arc::new(callback));
    }

    pub(crate) fn register_callback(&self, callback: CompletionCallback) {
        let inline = {
            let mut shared = self.inner.shared.lock();
            match shared.notice.clone() {
                Some(notice) => shared
                    .dispatcher
                    .get_or_insert_with(CallbackDispatcher::start)
                    .dispatch(vec![callback], notice),
                None => {
                    shared.callbacks.push(callback);
                    None
                }
            }
        };
        if let Some(batch) = inline {
            batch.run();
        }
    }

    async fn observe(&self, snapshot: StatusSnapshot) -> Result<StatusSnapshot> {
        let previous = {
            let mut shared = self.inner.shared.lock();
            let from = shared.last_status.state;
            if !from.can_transition_to(snapshot.state) {
                warn!(job_id = %self.inner.id, from = %from, to = %snapshot.state, "Illegal state transition reported");
                return Err(QetlError::UnexpectedState {
                    job_id: self.inner.id.clone(),
                    from,
                    to: snapshot.state,
                });
            }
            shared.last_status = snapshot.clone();
            from
        };

        if previous != snapshot.state {
            info!(job_id = %self.inner.id, from = %previous, state = %snapshot.state, progress = snapshot.progress, "Job status changed");
            self.inner.events.try_emit(
                events::JOB_STATUS_CHANGED,
                Some(events::job_payload(
                    &self.inner.id,
                    json!({
                        "from": previous,
                        "state": snapshot.state,
                        "progress": snapshot.progress,
                        "message": snapshot.message,
                    }),
                )),
            );
            if snapshot.is_terminal() {
                self.announce_terminal(&snapshot);
                match Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(self.clone().finish(snapshot.clone()));
                    }
                    Err(_) => self.clone().finish(snapshot.clone()).await,
                }
            }
        }

        Ok(snapshot)
    }

    fn announce_terminal(&self, snapshot: &StatusSnapshot) {
        let event = match snapshot.state {
            JobState::Completed => events::JOB_COMPLETED,
            JobState::Failed => events::JOB_FAILED,
            _ => events::JOB_CANCELLED,
        };
        self.inner.events.try_emit(
            event,
            Some(events::job_payload(
                &self.inner.id,
                json!({ "state": snapshot.state, "message": snapshot.message }),
            )),
        );
    }

    /// Builds the completion notice and hands the pending callbacks to the
    /// dispatcher.
    ///
    /// Runs once per job, on its own task when a runtime is available.
    /// Dropping the future that observed the terminal state does not
    /// cancel it.
    async fn finish(self, snapshot: StatusSnapshot) {
        let results = if snapshot.state == JobState::Completed {
            match self.results_for_completed().await {
                Ok(results) => Some(results),
                Err(e) => {
                    warn!(job_id = %self.inner.id, error = %e, "Could not fetch results for completed job");
                    None
                }
            }
        } else {
            None
        };

        let notice = CompletionNotice {
            job_id: self.inner.id.clone(),
            snapshot,
            results,
        };
        let inline = {
            let mut shared = self.inner.shared.lock();
            let callbacks = std::mem::take(&mut shared.callbacks);
            shared.notice = Some(notice.clone());
            shared
                .dispatcher
                .get_or_insert_with(CallbackDispatcher::start)
                .dispatch(callbacks, notice)
        };
        if let Some(batch) = inline {
            batch.run();
        }
    }

    async fn conclude(&self, snapshot: &StatusSnapshot) -> Result<JobResults> {
        match snapshot.state {
            JobState::Completed => self.results_for_completed().await,
            JobState::Failed => Err(QetlError::JobFailed {
                job_id: self.inner.id.clone(),
                message: snapshot.message.clone(),
            }),
            JobState::Cancelled => Err(QetlError::JobCancelled {
                job_id: self.inner.id.clone(),
            }),
            state => Err(QetlError::ResultsNotReady {
                job_id: self.inner.id.clone(),
                state,
            }),
        }
    }

    /// Fetches results at most once; concurrent callers share the fetch.
    async fn results_for_completed(&self) -> Result<JobResults> {
        let results = self
            .inner
            .results
            .get_or_try_init(|| self.inner.runner.fetch_results(&self.inner.id))
            .await?;
        Ok(results.clone())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("last_status", &self.last_status())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({}, {})", self.inner.id, self.state())
    }
}

/// A pending [`Job::get_results`] running on a background task.
#[derive(Debug)]
pub struct ResultsHandle {
    job_id: String,
    handle: JoinHandle<Result<JobResults>>,
}

impl ResultsHandle {
    /// The job being awaited.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns true if the background wait has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops waiting. The job itself is not cancelled.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for ResultsHandle {
    type Output = Result<JobResults>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(QetlError::TaskFailed(e.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::ScriptedRunner;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn snap(state: JobState) -> StatusSnapshot {
        StatusSnapshot::new(state, 0.0, state.as_str())
    }

    fn job_with(runner: &Arc<ScriptedRunner>) -> Job {
        Job::from_parts(
            "job_1".to_string(),
            Arc::clone(runner) as Arc<dyn RunnerClient>,
            PollConfig::default(),
            Arc::new(NoOpEventSink),
        )
    }

    #[tokio::test]
    async fn test_get_status_updates_cache() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running)]);
        let job = job_with(&runner);

        assert_eq!(job.state(), JobState::Submitted);
        let status = job.get_status().await.unwrap();

        assert_eq!(status.state, JobState::Running);
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(runner.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_backward_transition_keeps_stale_snapshot() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running), snap(JobState::Queued)]);
        let job = job_with(&runner);

        job.get_status().await.unwrap();
        let err = job.get_status().await.unwrap_err();

        assert!(matches!(
            err,
            QetlError::UnexpectedState { from: JobState::Running, to: JobState::Queued, .. }
        ));
        assert_eq!(job.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_leaving_terminal_is_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Failed), snap(JobState::Running)]);
        let job = job_with(&runner);

        job.get_status().await.unwrap();
        assert!(job.get_status().await.is_err());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_results_polls_until_completed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status(
            "job_1",
            vec![
                snap(JobState::Validating),
                snap(JobState::Running),
                snap(JobState::Completed),
            ],
        );
        runner.set_results("job_1", JobResults::new().with_output("out", "/data/out.json"));
        let job = job_with(&runner);

        let results = job.get_results(Duration::from_secs(60)).await.unwrap();

        assert_eq!(results.output("out"), Some("/data/out.json"));
        assert_eq!(runner.poll_count(), 3);
        assert_eq!(runner.fetch_count(), 1);

        // cached: neither polls nor fetches again
        job.get_results(Duration::from_secs(60)).await.unwrap();
        assert_eq!(runner.poll_count(), 3);
        assert_eq!(runner.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_results_failed_and_cancelled() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status(
            "job_1",
            vec![StatusSnapshot::new(JobState::Failed, 0.4, "component crashed")],
        );
        let job = job_with(&runner);

        match job.get_results(Duration::from_secs(5)).await {
            Err(QetlError::JobFailed { message, .. }) => assert_eq!(message, "component crashed"),
            other => panic!("expected JobFailed, got {other:?}"),
        }

        runner.script_status("job_2", vec![snap(JobState::Cancelled)]);
        let cancelled = Job::attach("job_2", Arc::clone(&runner) as Arc<dyn RunnerClient>);
        assert!(matches!(
            cancelled.get_results(Duration::from_secs(5)).await,
            Err(QetlError::JobCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_without_polling() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running)]);
        let job = job_with(&runner);

        let err = job.get_results(Duration::ZERO).await.unwrap_err();

        assert!(matches!(
            err,
            QetlError::JobTimeout { last_state: JobState::Submitted, .. }
        ));
        assert_eq!(runner.poll_count(), 0);
        assert_eq!(runner.cancel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_running_does_not_cancel() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running)]);
        let job = job_with(&runner);

        let err = job.get_results(Duration::from_secs(2)).await.unwrap_err();

        assert!(matches!(err, QetlError::JobTimeout { last_state: JobState::Running, .. }));
        assert!(runner.poll_count() >= 2);
        assert_eq!(runner.cancel_count(), 0);
        assert_eq!(job.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_cancel_on_terminal_is_local() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            let runner = Arc::new(ScriptedRunner::new());
            runner.script_status("job_1", vec![snap(terminal)]);
            let job = job_with(&runner);
            job.get_status().await.unwrap();
            let before = job.last_status();

            assert!(!job.cancel().await.unwrap(), "{terminal}");
            assert_eq!(runner.cancel_count(), 0, "{terminal}");
            assert_eq!(job.last_status(), before, "{terminal}");
        }
    }

    #[tokio::test]
    async fn test_cancel_forwards_and_keeps_cache() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running)]);
        let job = job_with(&runner);
        job.get_status().await.unwrap();

        assert!(job.cancel().await.unwrap());
        assert_eq!(runner.cancel_count(), 1);
        assert_eq!(job.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_callbacks_fire_once_in_order_and_late_registration() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Completed)]);
        runner.set_results("job_1", JobResults::new());
        let job = job_with(&runner);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in [1, 2] {
            let tx = tx.clone();
            job.on_completion(move |notice| {
                let _ = tx.send((id, notice.snapshot.state, notice.results.is_some()));
            });
        }

        job.get_status().await.unwrap();
        job.get_status().await.unwrap();

        let late = tx.clone();
        job.on_completion(move |notice| {
            let _ = late.send((3, notice.snapshot.state, notice.results.is_some()));
        });
        drop(tx);

        let mut seen = Vec::new();
        while let Some(entry) = rx.recv().await {
            seen.push(entry);
        }
        assert_eq!(
            seen,
            vec![
                (1, JobState::Completed, true),
                (2, JobState::Completed, true),
                (3, JobState::Completed, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_survive_abandoned_wait() {
        let runner = Arc::new(ScriptedRunner::new().with_fetch_delay(Duration::from_secs(10)));
        runner.script_status("job_1", vec![snap(JobState::Completed)]);
        runner.set_results("job_1", JobResults::new().with_output("out", "/data/out.json"));
        let job = job_with(&runner);
        let (tx, mut rx) = mpsc::unbounded_channel();
        job.on_completion(move |notice| {
            let _ = tx.send(notice.results.as_ref().and_then(|r| r.output("out").map(str::to_string)));
        });

        // Give up while the results fetch is still in flight.
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), job.get_results(Duration::from_secs(60))).await;
        assert!(abandoned.is_err());
        assert_eq!(job.state(), JobState::Completed);

        // Further polls see no state change; the notice still arrives once.
        job.get_status().await.unwrap();
        assert_eq!(rx.recv().await, Some(Some("/data/out.json".to_string())));
        assert_eq!(rx.recv().await, None);
        assert_eq!(job.cached_results().unwrap().output("out"), Some("/data/out.json"));
    }

    #[tokio::test]
    async fn test_logs_come_from_runner() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![StatusSnapshot::new(JobState::Running, 0.4, "Executing pipeline")]);
        let job = job_with(&runner);
        job.get_status().await.unwrap();

        assert_eq!(job.logs().await.unwrap(), vec!["Executing pipeline".to_string()]);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Running), snap(JobState::Failed)]);
        let sink = Arc::new(CollectingEventSink::new());
        let job = Job::from_parts(
            "job_1".to_string(),
            Arc::clone(&runner) as Arc<dyn RunnerClient>,
            PollConfig::default(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );

        job.get_status().await.unwrap();
        job.cancel().await.unwrap();
        job.get_status().await.unwrap();

        let types = sink.event_types();
        assert_eq!(
            types,
            vec![
                events::JOB_STATUS_CHANGED,
                events::JOB_CANCEL_REQUESTED,
                events::JOB_STATUS_CHANGED,
                events::JOB_FAILED,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_results_when_done() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_status("job_1", vec![snap(JobState::Queued), snap(JobState::Completed)]);
        runner.set_results("job_1", JobResults::new().with_output("report", "r.json"));
        let job = job_with(&runner);

        let handle = job.get_results_when_done(Duration::from_secs(30));
        assert_eq!(handle.job_id(), "job_1");

        let results = handle.await.unwrap();
        assert_eq!(results.output("report"), Some("r.json"));
        assert!(job.is_successful());
    }
}
