//! In-process backend: runs a Rust objective function on tokio's blocking
//! thread pool, at most `workers` at a time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sx_types::{is_failure, Configuration};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::backend::{ExecutionBackend, JobHandle, JobPoll, JobTable, SubmissionError};

/// Objective evaluated by a [`LocalBackend`]. `Err` marks the evaluation failed.
pub type ObjectiveFn = Arc<dyn Fn(&Configuration) -> Result<f64, String> + Send + Sync>;

pub struct LocalBackend {
    objective: ObjectiveFn,
    workers: usize,
    timeout: Option<Duration>,
    permits: Arc<Semaphore>,
    jobs: Arc<JobTable>,
    closed: AtomicBool,
}

impl LocalBackend {
    pub fn new<F>(workers: usize, objective: F) -> Self
    where
        F: Fn(&Configuration) -> Result<f64, String> + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        Self {
            objective: Arc::new(objective),
            workers,
            timeout: None,
            permits: Arc::new(Semaphore::new(workers)),
            jobs: Arc::new(JobTable::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Evaluations running longer than `timeout` are reported as failed. The
    /// blocking call itself runs to completion, holding its worker until it
    /// returns, and its result is discarded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse new submissions and fail jobs still waiting for a worker.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn submit(&self, config: &Configuration) -> Result<JobHandle, SubmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmissionError::Closed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SubmissionError::Unavailable {
                message: e.to_string(),
            }
        })?;

        let handle = self.jobs.allocate();
        let jobs = self.jobs.clone();
        let permits = self.permits.clone();
        let objective = self.objective.clone();
        let timeout = self.timeout;
        let config = config.clone();

        let task = runtime.spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    jobs.resolve(handle, JobPoll::Failed("backend closed".to_string()));
                    return;
                }
            };

            // The permit travels with the blocking call, so an abandoned
            // objective still occupies its worker until it returns.
            let work = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                objective(&config)
            });
            let joined = match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        jobs.resolve(
                            handle,
                            JobPoll::Failed(format!("timed out after {limit:?}")),
                        );
                        return;
                    }
                },
                None => work.await,
            };

            let outcome = match joined {
                Ok(Ok(value)) if !is_failure(value) => JobPoll::Resolved(value),
                Ok(Ok(value)) => JobPoll::Failed(format!("unusable objective {value}")),
                Ok(Err(message)) => JobPoll::Failed(message),
                Err(e) => JobPoll::Failed(format!("objective panicked: {e}")),
            };
            debug!(job = %handle, ?outcome, "local job finished");
            jobs.resolve(handle, outcome);
        });
        self.jobs.register(handle, task.abort_handle());

        Ok(handle)
    }

    fn poll(&self, handle: JobHandle) -> JobPoll {
        self.jobs.poll(handle)
    }

    async fn wait(&self, handles: &[JobHandle], timeout: Option<Duration>) -> Vec<JobHandle> {
        self.jobs.wait(handles, timeout).await
    }

    fn cancel(&self, handle: JobHandle) {
        self.jobs.cancel(handle);
    }

    fn release(&self, handle: JobHandle) {
        self.jobs.release(handle);
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn square(config: &Configuration) -> Result<f64, String> {
        let x = config
            .get("x")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "missing x".to_string())?;
        Ok(x * x)
    }

    #[tokio::test]
    async fn local_backend_runs_objective() {
        let backend = LocalBackend::new(2, square);
        let handle = backend.submit(&Configuration::new().with("x", 3.0)).unwrap();

        let ready = backend.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert_eq!(ready, vec![handle]);
        assert_eq!(backend.poll(handle), JobPoll::Resolved(9.0));
    }

    #[tokio::test]
    async fn objective_error_becomes_failure() {
        let backend = LocalBackend::new(1, square);
        let handle = backend.submit(&Configuration::new().with("y", 1)).unwrap();
        backend.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert_eq!(backend.poll(handle), JobPoll::Failed("missing x".to_string()));
    }

    #[tokio::test]
    async fn nan_objective_becomes_failure() {
        let backend = LocalBackend::new(1, |_: &Configuration| Ok(f64::NAN));
        let handle = backend.submit(&Configuration::new()).unwrap();
        backend.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert!(matches!(backend.poll(handle), JobPoll::Failed(_)));
    }

    #[tokio::test]
    async fn slow_objective_times_out() {
        let backend = LocalBackend::new(1, |_: &Configuration| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(1.0)
        })
        .with_timeout(Some(Duration::from_millis(20)));
        let handle = backend.submit(&Configuration::new()).unwrap();
        backend.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert!(matches!(backend.poll(handle), JobPoll::Failed(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn timed_out_objective_keeps_its_worker() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        let backend = LocalBackend::new(1, move |_: &Configuration| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(1.0)
        })
        .with_timeout(Some(Duration::from_millis(5)));

        let handles: Vec<JobHandle> = (0..3i64)
            .map(|i| backend.submit(&Configuration::new().with("x", i)).unwrap())
            .collect();
        for handle in &handles {
            backend.wait(&[*handle], Some(Duration::from_secs(5))).await;
            assert!(matches!(backend.poll(*handle), JobPoll::Failed(msg) if msg.contains("timed out")));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_job_is_no_longer_tracked() {
        let backend = LocalBackend::new(1, square);
        let handle = backend.submit(&Configuration::new().with("x", 2.0)).unwrap();
        backend.wait(&[handle], Some(Duration::from_secs(5))).await;
        assert_eq!(backend.poll(handle), JobPoll::Resolved(4.0));

        backend.release(handle);
        assert_eq!(backend.jobs.len(), 0);
    }

    #[tokio::test]
    async fn closed_backend_rejects_submissions() {
        let backend = LocalBackend::new(1, square);
        backend.close();
        let err = backend.submit(&Configuration::new().with("x", 1.0)).unwrap_err();
        assert!(matches!(err, SubmissionError::Closed));
    }

    #[test]
    fn submission_outside_runtime_is_a_fault() {
        let backend = LocalBackend::new(1, square);
        let err = backend.submit(&Configuration::new().with("x", 1.0)).unwrap_err();
        assert!(matches!(err, SubmissionError::Unavailable { .. }));
    }
}
