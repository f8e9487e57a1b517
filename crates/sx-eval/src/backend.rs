//! Execution backend abstraction.
//!
//! A backend accepts configurations, runs them somewhere (worker threads, child
//! processes) and reports each one's objective through an opaque handle.
//! Backends own their parallelism; callers only see submit, poll, wait and
//! cancel.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sx_types::Configuration;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::local::LocalBackend;
use crate::subprocess::SubprocessBackend;

/// Opaque reference to one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Current state of a job as seen by [`ExecutionBackend::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    Unresolved,
    Resolved(f64),
    Failed(String),
}

impl JobPoll {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, JobPoll::Unresolved)
    }
}

/// Errors surfaced when a backend cannot accept work.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("backend is shut down")]
    Closed,
    #[error("no worker available: {message}")]
    Unavailable { message: String },
    #[error("cannot encode configuration: {message}")]
    Encoding { message: String },
}

/// Capability contract every execution backend fulfils.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start evaluating a configuration. Must not block on the evaluation.
    fn submit(&self, config: &Configuration) -> Result<JobHandle, SubmissionError>;

    /// Non-blocking status check.
    fn poll(&self, handle: JobHandle) -> JobPoll;

    /// Wait until at least one of `handles` resolves or `timeout` elapses.
    /// Returns the resolved subset, empty on timeout.
    async fn wait(&self, handles: &[JobHandle], timeout: Option<Duration>) -> Vec<JobHandle>;

    /// Abandon a job. Its handle resolves as failed unless it already finished.
    fn cancel(&self, _handle: JobHandle) {}

    /// The caller has consumed the outcome of `handle` and will not poll it
    /// again, so the backend may drop what it keeps for the job.
    fn release(&self, _handle: JobHandle) {}

    /// Number of evaluations the backend runs concurrently.
    fn worker_count(&self) -> usize;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}

/// The closed set of backends a search can be configured with.
pub enum Backend {
    Local(LocalBackend),
    Subprocess(SubprocessBackend),
}

#[async_trait]
impl ExecutionBackend for Backend {
    fn submit(&self, config: &Configuration) -> Result<JobHandle, SubmissionError> {
        match self {
            Backend::Local(b) => b.submit(config),
            Backend::Subprocess(b) => b.submit(config),
        }
    }

    fn poll(&self, handle: JobHandle) -> JobPoll {
        match self {
            Backend::Local(b) => b.poll(handle),
            Backend::Subprocess(b) => b.poll(handle),
        }
    }

    async fn wait(&self, handles: &[JobHandle], timeout: Option<Duration>) -> Vec<JobHandle> {
        match self {
            Backend::Local(b) => b.wait(handles, timeout).await,
            Backend::Subprocess(b) => b.wait(handles, timeout).await,
        }
    }

    fn cancel(&self, handle: JobHandle) {
        match self {
            Backend::Local(b) => b.cancel(handle),
            Backend::Subprocess(b) => b.cancel(handle),
        }
    }

    fn release(&self, handle: JobHandle) {
        match self {
            Backend::Local(b) => b.release(handle),
            Backend::Subprocess(b) => b.release(handle),
        }
    }

    fn worker_count(&self) -> usize {
        match self {
            Backend::Local(b) => b.worker_count(),
            Backend::Subprocess(b) => b.worker_count(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Backend::Local(b) => b.name(),
            Backend::Subprocess(b) => b.name(),
        }
    }
}

/// Lifecycle of one job inside a [`JobTable`].
#[derive(Debug)]
enum JobSlot {
    /// Allocated; the abort handle arrives once the task is spawned.
    Running(Option<AbortHandle>),
    Done(JobPoll),
}

/// Bookkeeping shared by the task-based backends: handle allocation, the
/// state of every job not yet released, and a wake-up signal.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    next_id: AtomicU64,
    jobs: DashMap<JobHandle, JobSlot>,
    notify: Notify,
}

impl JobTable {
    /// Reserve a handle. The job counts as running from here on.
    pub(crate) fn allocate(&self) -> JobHandle {
        let handle = JobHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.jobs.insert(handle, JobSlot::Running(None));
        handle
    }

    /// Attach the task that runs `handle`. A job already resolved or released
    /// by the time its task is attached has its task aborted.
    pub(crate) fn register(&self, handle: JobHandle, abort: AbortHandle) {
        match self.jobs.get_mut(&handle) {
            Some(mut slot) => match slot.value_mut() {
                JobSlot::Running(task) => *task = Some(abort),
                JobSlot::Done(_) => abort.abort(),
            },
            None => abort.abort(),
        }
    }

    pub(crate) fn resolve(&self, handle: JobHandle, outcome: JobPoll) {
        if let Some(mut slot) = self.jobs.get_mut(&handle) {
            // First outcome wins; a cancellation never overwrites a real result.
            if matches!(slot.value(), JobSlot::Running(_)) {
                *slot.value_mut() = JobSlot::Done(outcome);
            }
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn poll(&self, handle: JobHandle) -> JobPoll {
        match self.jobs.get(&handle).as_deref() {
            Some(JobSlot::Done(outcome)) => outcome.clone(),
            _ => JobPoll::Unresolved,
        }
    }

    pub(crate) fn cancel(&self, handle: JobHandle) {
        if let Some(mut entry) = self.jobs.get_mut(&handle) {
            let slot = entry.value_mut();
            if let JobSlot::Running(task) = slot {
                if let Some(task) = task.take() {
                    task.abort();
                }
                *slot = JobSlot::Done(JobPoll::Failed("cancelled".to_string()));
            }
        }
        self.notify.notify_waiters();
    }

    /// Forget a job whose outcome has been consumed. A still-running job is
    /// aborted first.
    pub(crate) fn release(&self, handle: JobHandle) {
        if let Some((_, JobSlot::Running(Some(task)))) = self.jobs.remove(&handle) {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    fn is_done(&self, handle: &JobHandle) -> bool {
        matches!(self.jobs.get(handle).as_deref(), Some(JobSlot::Done(_)))
    }

    pub(crate) async fn wait(
        &self,
        handles: &[JobHandle],
        timeout: Option<Duration>,
    ) -> Vec<JobHandle> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a resolve in between is not lost.
            notified.as_mut().enable();

            let resolved: Vec<JobHandle> = handles
                .iter()
                .copied()
                .filter(|h| self.is_done(h))
                .collect();
            if !resolved.is_empty() || handles.is_empty() {
                return resolved;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Vec::new();
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_table_wait_times_out_when_nothing_resolves() {
        let table = JobTable::default();
        let handle = table.allocate();
        let ready = table
            .wait(&[handle], Some(Duration::from_millis(20)))
            .await;
        assert!(ready.is_empty());
        assert_eq!(table.poll(handle), JobPoll::Unresolved);
    }

    #[tokio::test]
    async fn job_table_wait_wakes_on_resolve() {
        let table = std::sync::Arc::new(JobTable::default());
        let handle = table.allocate();

        let resolver = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.resolve(handle, JobPoll::Resolved(4.0));
        });

        let ready = table.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert_eq!(ready, vec![handle]);
        assert_eq!(table.poll(handle), JobPoll::Resolved(4.0));
    }

    #[test]
    fn cancel_does_not_overwrite_result() {
        let table = JobTable::default();
        let handle = table.allocate();
        table.resolve(handle, JobPoll::Resolved(1.0));
        table.cancel(handle);
        assert_eq!(table.poll(handle), JobPoll::Resolved(1.0));

        let other = table.allocate();
        table.cancel(other);
        assert!(matches!(table.poll(other), JobPoll::Failed(_)));
    }

    #[test]
    fn released_jobs_are_forgotten() {
        let table = JobTable::default();
        let handle = table.allocate();
        table.resolve(handle, JobPoll::Resolved(2.0));
        assert_eq!(table.len(), 1);

        table.release(handle);
        assert_eq!(table.len(), 0);
        // A late outcome for a released job is dropped, not stored.
        table.resolve(handle, JobPoll::Resolved(3.0));
        assert_eq!(table.len(), 0);
        assert_eq!(table.poll(handle), JobPoll::Unresolved);
    }

    #[tokio::test]
    async fn job_resolved_before_register_is_not_left_running() {
        let table = JobTable::default();
        let handle = table.allocate();
        table.resolve(handle, JobPoll::Resolved(1.0));

        let task = tokio::spawn(std::future::pending::<()>());
        table.register(handle, task.abort_handle());
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(table.poll(handle), JobPoll::Resolved(1.0));
    }
}
