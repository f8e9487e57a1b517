//! # sx-search
//!
//! Asynchronous model-based search for Sextant.
//!
//! Ties an evaluation [`Ledger`](sx_eval::Ledger) and a constant-liar
//! [`SurrogateOptimizer`](sx_optimizer::SurrogateOptimizer) together in a
//! closed-loop control task with periodic checkpoints, budgets and graceful
//! shutdown.

pub mod benchmark;
mod search;
mod settings;
mod stop;

pub use search::{BestEvaluation, DrainReason, SearchLoop, SearchPhase, SearchSummary};
pub use settings::{
    BackendKind, SearchSettings, CONFIG_ENV, MAX_EVALS_ENV, OUTPUT_DIR_ENV, WORKERS_ENV,
};
pub use stop::StopToken;
