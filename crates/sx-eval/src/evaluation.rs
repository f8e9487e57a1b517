//! Evaluation records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sx_types::{is_failure, Configuration, Fingerprint, FAILURE_SENTINEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Requested,
    Pending,
    Finished,
    Failed,
}

/// One evaluation of a configuration.
///
/// Created in `Requested`, moved to `Pending` once a backend accepted it, and
/// resolved exactly once into `Finished` or `Failed`. Resolved records never
/// change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub fingerprint: Fingerprint,
    pub configuration: Configuration,
    pub status: EvaluationStatus,
    /// Real objective when finished, [`FAILURE_SENTINEL`] when failed.
    pub objective: Option<f64>,
    /// Seconds since the ledger started.
    pub submitted_at: f64,
    /// Seconds since the ledger started.
    pub finished_at: Option<f64>,
    pub error: Option<String>,
    /// Set on copies handed to a request that reused an earlier evaluation.
    #[serde(default)]
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(fingerprint: Fingerprint, configuration: Configuration, elapsed: f64) -> Self {
        Self {
            fingerprint,
            configuration,
            status: EvaluationStatus::Requested,
            objective: None,
            submitted_at: elapsed,
            finished_at: None,
            error: None,
            cache_hit: false,
            created_at: Utc::now(),
        }
    }

    pub fn mark_pending(&mut self) {
        self.status = EvaluationStatus::Pending;
    }

    /// Record a real objective. Unusable values are recorded as failures.
    pub fn mark_finished(&mut self, objective: f64, elapsed: f64) {
        if self.is_resolved() {
            return;
        }
        if is_failure(objective) {
            self.mark_failed(format!("unusable objective {objective}"), elapsed);
            return;
        }
        self.status = EvaluationStatus::Finished;
        self.objective = Some(objective);
        self.finished_at = Some(elapsed);
    }

    pub fn mark_failed(&mut self, error: String, elapsed: f64) {
        if self.is_resolved() {
            return;
        }
        self.status = EvaluationStatus::Failed;
        self.objective = Some(FAILURE_SENTINEL);
        self.finished_at = Some(elapsed);
        self.error = Some(error);
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            EvaluationStatus::Finished | EvaluationStatus::Failed
        )
    }

    /// Objective to report downstream; unresolved evaluations count as failed.
    pub fn objective_or_sentinel(&self) -> f64 {
        self.objective.unwrap_or(FAILURE_SENTINEL)
    }

    /// Copy of this record answering another request for the same fingerprint.
    pub(crate) fn answer_for(&self, configuration: &Configuration) -> Self {
        let mut copy = self.clone();
        copy.configuration = configuration.clone();
        copy.cache_hit = true;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Evaluation {
        let config = Configuration::new().with("x", 1.5);
        Evaluation::new(Fingerprint::new("{\"x\":1.5}"), config, 0.25)
    }

    #[test]
    fn evaluation_lifecycle() {
        let mut eval = sample();
        assert_eq!(eval.status, EvaluationStatus::Requested);
        assert!(!eval.is_resolved());

        eval.mark_pending();
        assert_eq!(eval.status, EvaluationStatus::Pending);

        eval.mark_finished(2.0, 3.5);
        assert_eq!(eval.status, EvaluationStatus::Finished);
        assert_eq!(eval.objective, Some(2.0));
        assert_eq!(eval.finished_at, Some(3.5));
    }

    #[test]
    fn evaluation_failure_uses_sentinel() {
        let mut eval = sample();
        eval.mark_pending();
        eval.mark_failed("worker crashed".into(), 1.0);
        assert_eq!(eval.status, EvaluationStatus::Failed);
        assert_eq!(eval.objective, Some(FAILURE_SENTINEL));
        assert_eq!(eval.error.as_deref(), Some("worker crashed"));
    }

    #[test]
    fn resolved_results_are_immutable() {
        let mut eval = sample();
        eval.mark_finished(1.0, 2.0);
        eval.mark_failed("late cancel".into(), 3.0);
        eval.mark_finished(0.5, 4.0);
        assert_eq!(eval.status, EvaluationStatus::Finished);
        assert_eq!(eval.objective, Some(1.0));
        assert!(eval.error.is_none());
    }

    #[test]
    fn infinite_objective_is_a_failure() {
        let mut eval = sample();
        eval.mark_finished(f64::INFINITY, 1.0);
        assert_eq!(eval.status, EvaluationStatus::Failed);
    }

    #[test]
    fn answer_copy_is_marked() {
        let mut eval = sample();
        eval.mark_finished(3.0, 1.0);
        let other = Configuration::new().with("x", 1.5).with("seed", 7);
        let copy = eval.answer_for(&other);
        assert!(copy.cache_hit);
        assert_eq!(copy.configuration, other);
        assert_eq!(copy.fingerprint, eval.fingerprint);
        assert_eq!(copy.objective, Some(3.0));
    }
}
