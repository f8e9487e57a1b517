//! Subprocess backend: one child process per evaluation.
//!
//! The configuration is passed as a JSON object in the last argument. The
//! child reports its objective by printing a line containing the output
//! marker followed by the value, e.g. `SX-OUTPUT: 0.42`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use sx_types::Configuration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::backend::{ExecutionBackend, JobHandle, JobPoll, JobTable, SubmissionError};

pub const DEFAULT_OUTPUT_MARKER: &str = "SX-OUTPUT:";

pub struct SubprocessBackend {
    program: PathBuf,
    args: Vec<String>,
    marker: String,
    workers: usize,
    timeout: Option<Duration>,
    permits: Arc<Semaphore>,
    jobs: Arc<JobTable>,
}

impl SubprocessBackend {
    pub fn new(program: impl Into<PathBuf>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            program: program.into(),
            args: Vec::new(),
            marker: DEFAULT_OUTPUT_MARKER.to_string(),
            workers,
            timeout: None,
            permits: Arc::new(Semaphore::new(workers)),
            jobs: Arc::new(JobTable::default()),
        }
    }

    /// Arguments placed before the configuration argument.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Children running longer than `timeout` are killed and reported failed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse new submissions and fail jobs still waiting for a worker.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Extract the objective from a child's stdout. The first line containing
/// the marker (case-insensitive) wins; its last token must parse as a number.
pub fn parse_output(stdout: &str, marker: &str) -> Option<f64> {
    let marker = marker.to_uppercase();
    let line = stdout
        .lines()
        .find(|line| line.to_uppercase().contains(&marker))?;
    match line.split_whitespace().last()?.parse::<f64>() {
        Ok(value) if !value.is_nan() => Some(value),
        Ok(_) => None,
        Err(e) => {
            warn!(line = %line, error = %e, "could not parse objective line");
            None
        }
    }
}

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    fn submit(&self, config: &Configuration) -> Result<JobHandle, SubmissionError> {
        if self.permits.is_closed() {
            return Err(SubmissionError::Closed);
        }
        let payload = serde_json::to_string(config).map_err(|e| SubmissionError::Encoding {
            message: e.to_string(),
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SubmissionError::Unavailable {
                message: e.to_string(),
            }
        })?;

        let handle = self.jobs.allocate();
        let jobs = self.jobs.clone();
        let permits = self.permits.clone();
        let marker = self.marker.clone();
        let timeout = self.timeout;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let task = runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    jobs.resolve(handle, JobPoll::Failed("backend closed".to_string()));
                    return;
                }
            };

            let output = match timeout {
                Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                    Ok(output) => output,
                    Err(_) => {
                        jobs.resolve(
                            handle,
                            JobPoll::Failed(format!("killed after {limit:?}")),
                        );
                        return;
                    }
                },
                None => command.output().await,
            };

            let outcome = match output {
                Ok(output) if output.status.success() => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    match parse_output(&stdout, &marker) {
                        Some(value) => JobPoll::Resolved(value),
                        None => JobPoll::Failed(format!("no objective reported after {marker}")),
                    }
                }
                Ok(output) => JobPoll::Failed(format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
                Err(e) => JobPoll::Failed(format!("spawn failed: {e}")),
            };
            debug!(job = %handle, ?outcome, "subprocess job finished");
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
        "subprocess"
    }
}
