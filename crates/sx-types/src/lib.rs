pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod space;

pub use config::*;
pub use errors::*;
pub use fingerprint::*;
pub use space::*;

/// Objective recorded for an evaluation that could not produce a usable
/// value. Objectives are minimized, so this is the worst possible result.
pub const FAILURE_SENTINEL: f64 = f64::MAX;

/// Whether an objective stands for a failed evaluation.
pub fn is_failure(objective: f64) -> bool {
    !objective.is_finite() || objective >= FAILURE_SENTINEL
}
