//! # sx-optimizer
//!
//! Surrogate models and the constant-liar batch optimizer for Sextant.
//!
//! Provides the ask/tell model contract with kernel-regression and random
//! implementations, liar strategies, the lie table, and the optimizer that
//! keeps a model consistent with asynchronously arriving results.

mod acquisition;
mod kernel;
mod liar;
mod model;
mod optimizer;
mod random;

pub use acquisition::{AcquisitionKind, DEFAULT_XI};
pub use kernel::{KernelSurrogate, DEFAULT_KAPPA};
pub use liar::{EntryState, LiarStrategy, LieEntry, LieTable};
pub use model::{ModelKind, Point, Surrogate, SurrogateModel};
pub use optimizer::{
    ProposalBatches, SurrogateOptimizer, DEFAULT_BATCH_SIZE, DEFAULT_SEED,
};
pub use random::RandomSurrogate;
