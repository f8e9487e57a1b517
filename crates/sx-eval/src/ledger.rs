//! Evaluation ledger: the deduplicating record of every evaluation a search
//! has requested.
//!
//! The ledger owns the fingerprint cache and all [`Evaluation`] records.
//! Each distinct fingerprint is submitted to the backend at most once; later
//! requests for it are answered from the cache. Every request is answered
//! exactly once, by [`Ledger::harvest`] or [`Ledger::await_all`].
//!
//! Structural changes happen under one mutex. The lock is never held across
//! an `.await`: pending handles are snapshotted, the backend is polled or
//! waited on unlocked, and the outcomes are applied after re-locking.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};
use sx_types::{Configuration, Fingerprint, FingerprintCodec, SxResult};
use tracing::{debug, info, warn};

use crate::backend::{ExecutionBackend, JobHandle, JobPoll};
use crate::checkpoint::{write_checkpoint, CheckpointPaths};
use crate::evaluation::{Evaluation, EvaluationStatus};

/// One caller request, answered once its fingerprint resolves.
#[derive(Debug, Clone)]
struct Request {
    configuration: Configuration,
    fingerprint: Fingerprint,
    /// The request that created the evaluation, as opposed to a cache hit.
    first: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    cache: HashMap<Fingerprint, Evaluation>,
    pending: HashMap<Fingerprint, JobHandle>,
    requests: VecDeque<Request>,
    /// Fingerprints in the order they resolved.
    resolved: Vec<Fingerprint>,
    submissions: usize,
}

/// Counters describing the ledger's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub submissions: usize,
    pub pending: usize,
    pub finished: usize,
    pub failed: usize,
    pub outstanding_requests: usize,
}

pub struct Ledger<B: ExecutionBackend> {
    backend: B,
    codec: FingerprintCodec,
    state: Mutex<LedgerState>,
    started: Instant,
}

impl<B: ExecutionBackend> Ledger<B> {
    pub fn new(backend: B) -> Self {
        Self::with_codec(backend, FingerprintCodec::Canonical)
    }

    pub fn with_codec(backend: B, codec: FingerprintCodec) -> Self {
        info!(
            backend = backend.name(),
            workers = backend.worker_count(),
            ?codec,
            "evaluation ledger created"
        );
        Self {
            backend,
            codec,
            state: Mutex::new(LedgerState::default()),
            started: Instant::now(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn codec(&self) -> &FingerprintCodec {
        &self.codec
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Request an evaluation of `config`.
    pub fn submit(&self, config: &Configuration) -> SxResult<Fingerprint> {
        let fingerprint = self.codec.encode(config)?;
        let mut state = self.state.lock();
        self.submit_locked(&mut state, config, fingerprint.clone());
        Ok(fingerprint)
    }

    /// Request evaluations of a whole batch. All fingerprints are computed
    /// before anything is submitted, and the batch is registered under a
    /// single lock, so harvests see all of it or none of it.
    pub fn submit_batch(&self, configs: &[Configuration]) -> SxResult<Vec<Fingerprint>> {
        let fingerprints = configs
            .iter()
            .map(|config| self.codec.encode(config))
            .collect::<SxResult<Vec<_>>>()?;

        let mut state = self.state.lock();
        for (config, fingerprint) in configs.iter().zip(&fingerprints) {
            self.submit_locked(&mut state, config, fingerprint.clone());
        }
        Ok(fingerprints)
    }

    fn submit_locked(&self, state: &mut LedgerState, config: &Configuration, fingerprint: Fingerprint) {
        if state.cache.contains_key(&fingerprint) {
            debug!(%fingerprint, "already requested; skipping execution");
            state.requests.push_back(Request {
                configuration: config.clone(),
                fingerprint,
                first: false,
            });
            return;
        }

        let elapsed = self.elapsed();
        let mut evaluation = Evaluation::new(fingerprint.clone(), config.clone(), elapsed);
        state.submissions += 1;
        match self.backend.submit(config) {
            Ok(handle) => {
                evaluation.mark_pending();
                state.pending.insert(fingerprint.clone(), handle);
                info!(%fingerprint, job = %handle, "submitted new evaluation");
            }
            Err(e) => {
                warn!(%fingerprint, error = %e, "backend refused evaluation");
                evaluation.mark_failed(format!("submission fault: {e}"), elapsed);
                state.resolved.push(fingerprint.clone());
            }
        }
        state.cache.insert(fingerprint.clone(), evaluation);
        state.requests.push_back(Request {
            configuration: config.clone(),
            fingerprint,
            first: true,
        });
    }

    /// Collect finished evaluations.
    ///
    /// Without `block` this only polls. With `block`, when nothing has
    /// resolved yet it waits up to `timeout` (forever if `None`) for at least
    /// one pending job. Returns one evaluation per answered request, possibly
    /// none.
    pub async fn harvest(&self, block: bool, timeout: Option<Duration>) -> Vec<Evaluation> {
        let pending = self.pending_snapshot();
        let mut outcomes = self.poll_all(&pending);

        if outcomes.is_empty() && block && !pending.is_empty() {
            let handles: Vec<JobHandle> = pending.iter().map(|(_, h)| *h).collect();
            let ready = self.backend.wait(&handles, timeout).await;
            if ready.is_empty() {
                debug!(pending = pending.len(), ?timeout, "no evaluations resolved within wait window");
            }
            outcomes = self.poll_all(&pending);
        }

        let mut state = self.state.lock();
        for (fingerprint, outcome) in outcomes {
            self.record_outcome(&mut state, &fingerprint, outcome);
        }
        Self::answer_requests(&mut state)
    }

    /// Block until every evaluation for `configs` resolves or `timeout`
    /// elapses. Configurations the ledger has not seen are submitted first.
    /// Evaluations still unresolved at the deadline are cancelled and recorded
    /// as failed. Returns one evaluation per input, in input order.
    pub async fn await_all(
        &self,
        configs: &[Configuration],
        timeout: Option<Duration>,
    ) -> SxResult<Vec<Evaluation>> {
        let fingerprints = configs
            .iter()
            .map(|config| self.codec.encode(config))
            .collect::<SxResult<Vec<_>>>()?;

        let watched: Vec<(Fingerprint, JobHandle)> = {
            let mut state = self.state.lock();
            for (config, fingerprint) in configs.iter().zip(&fingerprints) {
                if !state.cache.contains_key(fingerprint) {
                    self.submit_locked(&mut state, config, fingerprint.clone());
                }
            }
            let mut watched: Vec<(Fingerprint, JobHandle)> = fingerprints
                .iter()
                .filter_map(|fp| state.pending.get(fp).map(|h| (fp.clone(), *h)))
                .collect();
            watched.sort();
            watched.dedup();
            watched
        };
        info!(count = watched.len(), "waiting on pending evaluations");

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outcomes: Vec<(Fingerprint, JobPoll)> = Vec::new();
        let mut remaining = watched;
        loop {
            // A concurrent harvest may already have applied some of them.
            {
                let state = self.state.lock();
                remaining.retain(|(fp, _)| state.pending.contains_key(fp));
            }
            let (done, still): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .map(|(fp, h)| {
                    let poll = self.backend.poll(h);
                    (fp, h, poll)
                })
                .partition(|(_, _, poll)| poll.is_resolved());
            outcomes.extend(done.into_iter().map(|(fp, _, poll)| (fp, poll)));
            remaining = still.into_iter().map(|(fp, h, _)| (fp, h)).collect();

            if remaining.is_empty() {
                break;
            }
            let left = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            let handles: Vec<JobHandle> = remaining.iter().map(|(_, h)| *h).collect();
            self.backend.wait(&handles, left).await;
        }

        let mut state = self.state.lock();
        for (fingerprint, outcome) in outcomes {
            self.record_outcome(&mut state, &fingerprint, outcome);
        }
        for (fingerprint, handle) in remaining {
            warn!(%fingerprint, job = %handle, "evaluation timed out; cancelling");
            self.backend.cancel(handle);
            self.record_outcome(
                &mut state,
                &fingerprint,
                JobPoll::Failed("timed out waiting for result".to_string()),
            );
        }

        let mut answers = Vec::with_capacity(configs.len());
        for (config, fingerprint) in configs.iter().zip(&fingerprints) {
            let position = state
                .requests
                .iter()
                .position(|r| &r.fingerprint == fingerprint && &r.configuration == config);
            let first = position
                .and_then(|idx| state.requests.remove(idx))
                .map(|r| r.first)
                .unwrap_or(false);
            if let Some(evaluation) = state.cache.get(fingerprint) {
                answers.push(if first {
                    evaluation.clone()
                } else {
                    evaluation.answer_for(config)
                });
            }
        }
        Ok(answers)
    }

    /// Write a checkpoint of every resolved evaluation into `dir`. Does
    /// nothing and returns `Ok(None)` when nothing has resolved yet.
    pub fn dump_checkpoint(&self, dir: &Path) -> SxResult<Option<CheckpointPaths>> {
        let snapshot = self.resolved_evaluations();
        write_checkpoint(dir, &snapshot)
    }

    /// Cancel every evaluation still in flight.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let pending: Vec<(Fingerprint, JobHandle)> = state.pending.drain().collect();
        if !pending.is_empty() {
            info!(count = pending.len(), "abandoning pending evaluations");
        }
        let elapsed = self.elapsed();
        for (fingerprint, handle) in pending {
            self.backend.cancel(handle);
            self.backend.release(handle);
            if let Some(evaluation) = state.cache.get_mut(&fingerprint) {
                evaluation.mark_failed("abandoned at shutdown".to_string(), elapsed);
            }
            state.resolved.push(fingerprint);
        }
    }

    /// Resolved evaluations in resolution order.
    pub fn resolved_evaluations(&self) -> Vec<Evaluation> {
        let state = self.state.lock();
        state
            .resolved
            .iter()
            .filter_map(|fp| state.cache.get(fp).cloned())
            .collect()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Evaluation> {
        self.state.lock().cache.get(fingerprint).cloned()
    }

    /// Finished evaluation with the lowest objective.
    pub fn best(&self) -> Option<Evaluation> {
        let state = self.state.lock();
        state
            .cache
            .values()
            .filter(|e| e.status == EvaluationStatus::Finished)
            .min_by(|a, b| a.objective_or_sentinel().total_cmp(&b.objective_or_sentinel()))
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state.lock();
        let mut stats = LedgerStats {
            submissions: state.submissions,
            pending: state.pending.len(),
            outstanding_requests: state.requests.len(),
            ..Default::default()
        };
        for evaluation in state.cache.values() {
            match evaluation.status {
                EvaluationStatus::Finished => stats.finished += 1,
                EvaluationStatus::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    fn pending_snapshot(&self) -> Vec<(Fingerprint, JobHandle)> {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .map(|(fp, h)| (fp.clone(), *h))
            .collect()
    }

    fn poll_all(&self, pending: &[(Fingerprint, JobHandle)]) -> Vec<(Fingerprint, JobPoll)> {
        pending
            .iter()
            .filter_map(|(fp, h)| {
                let poll = self.backend.poll(*h);
                poll.is_resolved().then(|| (fp.clone(), poll))
            })
            .collect()
    }

    /// Apply a backend outcome. Outcomes for evaluations that are no longer
    /// pending (already applied by a concurrent harvest) are ignored.
    fn record_outcome(&self, state: &mut LedgerState, fingerprint: &Fingerprint, outcome: JobPoll) {
        if !outcome.is_resolved() {
            return;
        }
        let Some(handle) = state.pending.remove(fingerprint) else {
            return;
        };
        self.backend.release(handle);
        let elapsed = self.elapsed();
        let Some(evaluation) = state.cache.get_mut(fingerprint) else {
            return;
        };
        match outcome {
            JobPoll::Resolved(objective) => {
                evaluation.mark_finished(objective, elapsed);
                info!(%fingerprint, objective, "evaluation finished");
            }
            JobPoll::Failed(reason) => {
                warn!(%fingerprint, reason = %reason, "evaluation failed");
                evaluation.mark_failed(reason, elapsed);
            }
            JobPoll::Unresolved => return,
        }
        state.resolved.push(fingerprint.clone());
    }

    fn answer_requests(state: &mut LedgerState) -> Vec<Evaluation> {
        let mut answers = Vec::new();
        let mut waiting = VecDeque::with_capacity(state.requests.len());
        while let Some(request) = state.requests.pop_front() {
            match state.cache.get(&request.fingerprint) {
                Some(evaluation) if evaluation.is_resolved() => {
                    answers.push(if request.first {
                        evaluation.clone()
                    } else {
                        evaluation.answer_for(&request.configuration)
                    });
                }
                _ => waiting.push_back(request),
            }
        }
        state.requests = waiting;
        answers
    }
}
