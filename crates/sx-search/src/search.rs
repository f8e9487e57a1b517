//! The asynchronous model-based search loop.
//!
//! One control task alternates between harvesting finished evaluations,
//! telling them to the optimizer, submitting the same number of fresh
//! proposals and writing periodic checkpoints. Outstanding work therefore
//! stays close to the backend's worker count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sx_eval::{Backend, Evaluation, ExecutionBackend, Ledger, ObjectiveFn};
use sx_optimizer::{Surrogate, SurrogateModel, SurrogateOptimizer};
use sx_types::{Configuration, Fingerprint, SearchSpace, SxError, SxResult};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::settings::SearchSettings;
use crate::stop::StopToken;

/// Lifecycle of a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchPhase {
    Initializing,
    Sampling,
    Running,
    Checkpointing,
    Draining,
    Terminated,
}

/// Why the loop stopped proposing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainReason {
    Stopped,
    TimeBudget,
    EvalBudget,
    /// No work in flight and the optimizer had nothing new to propose.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEvaluation {
    pub fingerprint: Fingerprint,
    pub configuration: Configuration,
    pub objective: f64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub id: Uuid,
    pub name: String,
    pub reason: DrainReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// Points proposed by the optimizer.
    pub proposals: usize,
    /// Evaluations told to the optimizer.
    pub told: usize,
    /// Evaluations actually started on the backend.
    pub submissions: usize,
    pub finished: usize,
    pub failed: usize,
    pub checkpoints: usize,
    pub best: Option<BestEvaluation>,
}

pub struct SearchLoop<B: ExecutionBackend, M: SurrogateModel> {
    id: Uuid,
    settings: SearchSettings,
    ledger: Ledger<B>,
    optimizer: SurrogateOptimizer<M>,
    stop: StopToken,
    phase: SearchPhase,
    told: usize,
    since_checkpoint: usize,
    checkpoints: usize,
}

impl SearchLoop<Backend, Surrogate> {
    /// Build the backend and model named in `settings`. `objective` is
    /// required for the local backend and ignored otherwise.
    pub fn from_settings(
        settings: SearchSettings,
        space: SearchSpace,
        objective: Option<ObjectiveFn>,
    ) -> SxResult<Self> {
        settings.validate()?;
        let backend = settings.build_backend(objective)?;
        let model = settings
            .model
            .build(
                space.dimensions(),
                settings.seed,
                settings.kappa,
                settings.acquisition,
            );
        Self::new(settings, space, backend, model)
    }
}

impl<B: ExecutionBackend, M: SurrogateModel> SearchLoop<B, M> {
    pub fn new(settings: SearchSettings, space: SearchSpace, backend: B, model: M) -> SxResult<Self> {
        settings.validate()?;
        let ledger = Ledger::with_codec(backend, settings.codec());
        let optimizer = SurrogateOptimizer::new(space, model, settings.liar_strategy)?
            .with_batch_size(settings.batch_size);
        let id = Uuid::new_v4();

        info!(
            search = %id,
            name = %settings.name,
            workers = ledger.backend().worker_count(),
            backend = ledger.backend().name(),
            model = optimizer.model().name(),
            strategy = %optimizer.strategy(),
            "search initialized"
        );

        Ok(Self {
            id,
            settings,
            ledger,
            optimizer,
            stop: StopToken::new(),
            phase: SearchPhase::Initializing,
            told: 0,
            since_checkpoint: 0,
            checkpoints: 0,
        })
    }

    /// Use an externally owned stop token, e.g. one wired to signal handlers.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger<B> {
        &self.ledger
    }

    pub fn optimizer(&self) -> &SurrogateOptimizer<M> {
        &self.optimizer
    }

    /// Run the search to completion. A search runs once; later calls fail
    /// with [`SxError::Terminated`].
    pub async fn run(&mut self) -> SxResult<SearchSummary> {
        if self.phase != SearchPhase::Initializing {
            return Err(SxError::Terminated);
        }
        let started_at = Utc::now();
        let clock = Instant::now();

        let reason = match self.drive(clock).await {
            Ok(reason) => reason,
            Err(err) => {
                error!(search = %self.id, error = %err, "search aborted");
                self.ledger.shutdown();
                self.enter(SearchPhase::Terminated);
                return Err(err);
            }
        };

        info!(search = %self.id, ?reason, told = self.told, "draining search");
        let drained = self.drain().await;
        self.enter(SearchPhase::Terminated);
        drained?;

        let stats = self.ledger.stats();
        let best = self.ledger.best().and_then(|evaluation| {
            evaluation.objective.map(|objective| BestEvaluation {
                fingerprint: evaluation.fingerprint,
                configuration: evaluation.configuration,
                objective,
            })
        });
        let summary = SearchSummary {
            id: self.id,
            name: self.settings.name.clone(),
            reason,
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: clock.elapsed().as_secs_f64(),
            proposals: self.optimizer.counter(),
            told: self.told,
            submissions: stats.submissions,
            finished: stats.finished,
            failed: stats.failed,
            checkpoints: self.checkpoints,
            best,
        };
        info!(
            search = %self.id,
            told = summary.told,
            failed = summary.failed,
            best = ?summary.best.as_ref().map(|b| b.objective),
            elapsed_secs = summary.elapsed_secs,
            "search finished"
        );
        Ok(summary)
    }

    async fn drive(&mut self, clock: Instant) -> SxResult<DrainReason> {
        self.enter(SearchPhase::Sampling);
        let mut initial = self.ledger.backend().worker_count();
        if let Some(max_evals) = self.settings.max_evals {
            initial = initial.min(max_evals);
        }
        let configs = self.optimizer.ask_initial(initial)?;
        info!(search = %self.id, count = configs.len(), "submitting initial design");
        self.ledger.submit_batch(&configs)?;

        self.enter(SearchPhase::Running);
        let poll_period = self.settings.poll_period();
        loop {
            if let Some(reason) = self.drain_reason(clock) {
                return Ok(reason);
            }

            let arrived = self.ledger.harvest(true, Some(poll_period)).await;
            if arrived.is_empty() {
                continue;
            }
            self.tell(&arrived)?;

            let mut wanted = arrived.len();
            if let Some(max_evals) = self.settings.max_evals {
                wanted = wanted.min(max_evals.saturating_sub(self.optimizer.counter()));
            }
            let mut submitted = 0;
            for batch in self.optimizer.ask(wanted) {
                let batch = batch?;
                self.ledger.submit_batch(&batch)?;
                submitted += batch.len();
            }
            debug!(
                search = %self.id,
                told = arrived.len(),
                submitted,
                pending = self.ledger.pending_count(),
                "loop iteration"
            );

            if self.since_checkpoint >= self.settings.checkpoint_interval {
                self.enter(SearchPhase::Checkpointing);
                self.checkpoint()?;
                self.since_checkpoint = 0;
                self.enter(SearchPhase::Running);
            }
        }
    }

    fn drain_reason(&self, clock: Instant) -> Option<DrainReason> {
        if self.stop.is_stopped() {
            return Some(DrainReason::Stopped);
        }
        if let Some(budget) = self.settings.max_duration() {
            if clock.elapsed() >= budget {
                return Some(DrainReason::TimeBudget);
            }
        }
        if let Some(max_evals) = self.settings.max_evals {
            if self.told >= max_evals {
                return Some(DrainReason::EvalBudget);
            }
        }
        let stats = self.ledger.stats();
        if stats.pending == 0 && stats.outstanding_requests == 0 {
            return Some(DrainReason::Exhausted);
        }
        None
    }

    /// Record what has already finished, write the final checkpoint and
    /// abandon the rest.
    async fn drain(&mut self) -> SxResult<()> {
        self.enter(SearchPhase::Draining);
        let arrived = self.ledger.harvest(false, None).await;
        let result = if arrived.is_empty() {
            Ok(())
        } else {
            self.tell(&arrived)
        }
        .and_then(|()| self.checkpoint());
        self.ledger.shutdown();
        result
    }

    fn tell(&mut self, arrived: &[Evaluation]) -> SxResult<()> {
        let results: Vec<(Configuration, f64)> = arrived
            .iter()
            .map(|e| (e.configuration.clone(), e.objective_or_sentinel()))
            .collect();
        self.optimizer.tell(&results)?;
        self.told += arrived.len();
        self.since_checkpoint += arrived.len();
        Ok(())
    }

    fn checkpoint(&mut self) -> SxResult<()> {
        if let Some(paths) = self.ledger.dump_checkpoint(&self.settings.output_dir)? {
            self.checkpoints += 1;
            info!(
                search = %self.id,
                records = %paths.records.display(),
                told = self.told,
                "checkpoint written"
            );
        }
        Ok(())
    }

    fn enter(&mut self, phase: SearchPhase) {
        debug!(search = %self.id, from = ?self.phase, to = ?phase, "phase change");
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use sx_eval::{read_objectives, LocalBackend, OBJECTIVES_FILE, RECORDS_FILE};
    use sx_optimizer::{AcquisitionKind, LiarStrategy, ModelKind, RandomSurrogate};
    use sx_types::FAILURE_SENTINEL;

    fn space() -> SearchSpace {
        SearchSpace::new().add_float("x", -1.0, 1.0).add_float("y", -1.0, 1.0)
    }

    fn bowl(config: &Configuration) -> Result<f64, String> {
        let x = config.get("x").and_then(|v| v.as_f64()).ok_or("no x")?;
        let y = config.get("y").and_then(|v| v.as_f64()).ok_or("no y")?;
        Ok(x * x + y * y)
    }

    fn settings(dir: &std::path::Path) -> SearchSettings {
        SearchSettings::new("test")
            .with_workers(3)
            .with_poll_period(Duration::from_millis(20))
            .with_checkpoint_interval(5)
            .with_output_dir(dir)
    }

    #[tokio::test]
    async fn runs_to_evaluation_budget() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path()).with_max_evals(Some(12));
        let objective: ObjectiveFn = Arc::new(bowl);
        let mut search = SearchLoop::from_settings(settings, space(), Some(objective)).unwrap();

        let summary = search.run().await.unwrap();

        assert_eq!(summary.reason, DrainReason::EvalBudget);
        assert_eq!(summary.told, 12);
        assert_eq!(summary.proposals, 12);
        assert_eq!(summary.submissions, 12);
        assert_eq!(summary.finished, 12);
        assert!(summary.checkpoints >= 2);
        assert!(summary.best.is_some());
        assert_eq!(search.phase(), SearchPhase::Terminated);
        assert_eq!(search.optimizer().lie_table().len(), 12);

        let objectives = read_objectives(&dir.path().join(OBJECTIVES_FILE)).unwrap();
        assert_eq!(objectives.len(), 12);
        assert!(dir.path().join(RECORDS_FILE).exists());
        let best = summary.best.unwrap();
        assert!(objectives.values().all(|v| *v >= best.objective));
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path()).with_max_evals(Some(3));
        let objective: ObjectiveFn = Arc::new(bowl);
        let mut search = SearchLoop::from_settings(settings, space(), Some(objective)).unwrap();

        search.run().await.unwrap();
        assert!(matches!(search.run().await, Err(SxError::Terminated)));
    }

    #[tokio::test]
    async fn stop_token_drains_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path()).with_workers(2);
        let backend = LocalBackend::new(2, |config: &Configuration| {
            std::thread::sleep(Duration::from_millis(200));
            bowl(config)
        });
        let model =
            ModelKind::Kernel.build(space().dimensions(), 1, 1.96, AcquisitionKind::Lcb);
        let stop = StopToken::new();
        let mut search = SearchLoop::new(settings, space(), backend, model)
            .unwrap()
            .with_stop_token(stop.clone());

        stop.stop();
        let summary = search.run().await.unwrap();

        assert_eq!(summary.reason, DrainReason::Stopped);
        assert_eq!(summary.proposals, 2);
        assert_eq!(summary.told, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.checkpoints, 0);
        assert_eq!(search.ledger().pending_count(), 0);
        assert!(!dir.path().join(OBJECTIVES_FILE).exists());
    }

    #[tokio::test]
    async fn time_budget_ends_search() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path())
            .with_max_evals(None)
            .with_max_duration(Duration::from_millis(150));
        let backend = LocalBackend::new(3, |config: &Configuration| {
            std::thread::sleep(Duration::from_millis(5));
            bowl(config)
        });
        let model =
            ModelKind::Random.build(space().dimensions(), 2, 1.96, AcquisitionKind::Lcb);
        let mut search = SearchLoop::new(settings, space(), backend, model).unwrap();

        let summary = search.run().await.unwrap();

        assert_eq!(summary.reason, DrainReason::TimeBudget);
        assert_eq!(summary.proposals, summary.submissions);
        assert_eq!(search.ledger().pending_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_told_and_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path())
            .with_max_evals(Some(6))
            .with_liar_strategy(LiarStrategy::Mean);
        let backend = LocalBackend::new(3, |_: &Configuration| Err("diverged".to_string()));
        let model =
            ModelKind::Kernel.build(space().dimensions(), 3, 1.96, AcquisitionKind::Lcb);
        let mut search = SearchLoop::new(settings, space(), backend, model).unwrap();

        let summary = search.run().await.unwrap();

        assert_eq!(summary.told, 6);
        assert_eq!(summary.failed, 6);
        assert!(summary.best.is_none());
        let objectives = read_objectives(&dir.path().join(OBJECTIVES_FILE)).unwrap();
        assert_eq!(objectives.len(), 6);
        assert!(objectives.values().all(|v| *v == FAILURE_SENTINEL));
    }

    #[tokio::test]
    async fn exhausted_space_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let space = SearchSpace::new().add_int("k", 0, 2);
        let settings = settings(dir.path()).with_workers(2).with_max_evals(None);
        let backend = LocalBackend::new(2, |config: &Configuration| {
            config
                .get("k")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| "no k".to_string())
        });
        let model = RandomSurrogate::new(space.dimensions(), 4);
        let mut search = SearchLoop::new(settings, space, backend, model).unwrap();

        let summary = search.run().await.unwrap();

        assert_eq!(summary.reason, DrainReason::Exhausted);
        assert_eq!(summary.told, 3);
        assert_eq!(summary.best.unwrap().objective, 0.0);
    }
}
