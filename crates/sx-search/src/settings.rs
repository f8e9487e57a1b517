//! Search settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sx_eval::{Backend, LocalBackend, ObjectiveFn, SubprocessBackend, DEFAULT_OUTPUT_MARKER};
use sx_optimizer::{AcquisitionKind, LiarStrategy, ModelKind, DEFAULT_BATCH_SIZE, DEFAULT_KAPPA, DEFAULT_SEED};
use sx_types::{config_error, FingerprintCodec, SearchSpace, SxResult};
use tracing::info;

pub const CONFIG_ENV: &str = "SEXTANT_CONFIG";
pub const WORKERS_ENV: &str = "SEXTANT_WORKERS";
pub const MAX_EVALS_ENV: &str = "SEXTANT_MAX_EVALS";
pub const OUTPUT_DIR_ENV: &str = "SEXTANT_OUTPUT_DIR";

/// Where evaluations run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process objective on the blocking thread pool.
    #[default]
    Local,
    /// One child process per evaluation.
    Subprocess {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_marker")]
        marker: String,
    },
}

fn default_marker() -> String {
    DEFAULT_OUTPUT_MARKER.to_string()
}

/// Everything a search run is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub name: String,

    /// Concurrent evaluations. Defaults to the machine's parallelism.
    pub worker_count: Option<usize>,

    /// Longest blocking wait of one loop iteration, in seconds.
    pub poll_period_secs: f64,

    /// Completed evaluations between checkpoints.
    pub checkpoint_interval: usize,

    /// Wall-clock budget in seconds.
    pub max_duration_secs: Option<f64>,

    /// Evaluation budget.
    pub max_evals: Option<usize>,

    pub output_dir: PathBuf,

    /// Proposals per batch handed to the ledger.
    pub batch_size: usize,

    pub liar_strategy: LiarStrategy,

    pub model: ModelKind,

    pub seed: u64,

    /// Exploration weight of the lower confidence bound.
    pub kappa: f64,

    /// How the kernel model ranks candidates.
    pub acquisition: AcquisitionKind,

    /// Per-evaluation time limit in seconds.
    pub eval_timeout_secs: Option<f64>,

    pub backend: BackendKind,

    /// Parameters that do not distinguish configurations in the cache.
    pub ignored_parameters: Vec<String>,

    /// Parameters to search. The binary falls back to the built-in
    /// benchmark when absent.
    pub space: Option<SearchSpace>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            name: "sextant".to_string(),
            worker_count: None,
            poll_period_secs: 2.0,
            checkpoint_interval: 10,
            max_duration_secs: None,
            max_evals: Some(100),
            output_dir: PathBuf::from("sextant-results"),
            batch_size: DEFAULT_BATCH_SIZE,
            liar_strategy: LiarStrategy::default(),
            model: ModelKind::default(),
            seed: DEFAULT_SEED,
            kappa: DEFAULT_KAPPA,
            acquisition: AcquisitionKind::default(),
            eval_timeout_secs: None,
            backend: BackendKind::default(),
            ignored_parameters: Vec::new(),
            space: None,
        }
    }
}

impl SearchSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = Some(workers);
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period_secs = period.as_secs_f64();
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration_secs = Some(duration.as_secs_f64());
        self
    }

    pub fn with_max_evals(mut self, max_evals: Option<usize>) -> Self {
        self.max_evals = max_evals;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_liar_strategy(mut self, strategy: LiarStrategy) -> Self {
        self.liar_strategy = strategy;
        self
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionKind) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_ignored_parameters(mut self, names: Vec<String>) -> Self {
        self.ignored_parameters = names;
        self
    }

    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_period_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs_f64)
    }

    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn codec(&self) -> FingerprintCodec {
        if self.ignored_parameters.is_empty() {
            FingerprintCodec::Canonical
        } else {
            FingerprintCodec::ignoring(self.ignored_parameters.iter().cloned())
        }
    }

    pub fn validate(&self) -> SxResult<()> {
        if self.worker_count == Some(0) {
            return Err(config_error!("worker_count must be at least 1"));
        }
        if !(self.poll_period_secs.is_finite() && self.poll_period_secs > 0.0) {
            return Err(config_error!(
                "poll_period_secs must be positive, got {}",
                self.poll_period_secs
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(config_error!("checkpoint_interval must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(config_error!("batch_size must be at least 1"));
        }
        if !(self.kappa.is_finite() && self.kappa >= 0.0) {
            return Err(config_error!("kappa must be non-negative, got {}", self.kappa));
        }
        for (field, value) in [
            ("max_duration_secs", self.max_duration_secs),
            ("eval_timeout_secs", self.eval_timeout_secs),
        ] {
            if let Some(secs) = value {
                if !(secs.is_finite() && secs > 0.0) {
                    return Err(config_error!("{field} must be positive, got {secs}"));
                }
            }
        }
        if let BackendKind::Subprocess { program, marker, .. } = &self.backend {
            if program.as_os_str().is_empty() {
                return Err(config_error!("subprocess backend needs a program"));
            }
            if marker.trim().is_empty() {
                return Err(config_error!("subprocess output marker must not be blank"));
            }
        }
        if let Some(space) = &self.space {
            space.validate()?;
        }
        Ok(())
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> SxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        Ok(settings)
    }

    /// Settings for the binary: the file named by `SEXTANT_CONFIG` if set,
    /// otherwise defaults, then environment overrides.
    pub fn from_env() -> SxResult<Self> {
        let mut settings = match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                info!(path = %path.display(), "loading search settings");
                Self::from_json_file(&path)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `SEXTANT_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> SxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(WORKERS_ENV) {
            let workers = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| config_error!("{WORKERS_ENV}={raw}: {e}"))?;
            self.worker_count = Some(workers);
        }
        if let Some(raw) = lookup(MAX_EVALS_ENV) {
            let raw = raw.trim();
            self.max_evals = if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(
                    raw.parse::<usize>()
                        .map_err(|e| config_error!("{MAX_EVALS_ENV}={raw}: {e}"))?,
                )
            };
        }
        if let Some(raw) = lookup(OUTPUT_DIR_ENV) {
            self.output_dir = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Build the configured backend. The local backend evaluates `objective`
    /// and fails to build without one.
    pub fn build_backend(&self, objective: Option<ObjectiveFn>) -> SxResult<Backend> {
        let workers = self.workers();
        match &self.backend {
            BackendKind::Local => {
                let objective =
                    objective.ok_or_else(|| config_error!("local backend needs an objective"))?;
                Ok(Backend::Local(
                    LocalBackend::new(workers, move |config| objective(config))
                        .with_timeout(self.eval_timeout()),
                ))
            }
            BackendKind::Subprocess {
                program,
                args,
                marker,
            } => Ok(Backend::Subprocess(
                SubprocessBackend::new(program.clone(), workers)
                    .with_args(args.clone())
                    .with_marker(marker.clone())
                    .with_timeout(self.eval_timeout()),
            )),
        }
    }
}
