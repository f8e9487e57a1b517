//! # sx-eval
//!
//! Asynchronous evaluation for Sextant: the execution backend contract with
//! local and subprocess implementations, the deduplicating evaluation ledger,
//! and checkpoint snapshots of finished work.

mod backend;
mod checkpoint;
mod evaluation;
mod ledger;
mod local;
mod subprocess;

pub use backend::{Backend, ExecutionBackend, JobHandle, JobPoll, SubmissionError};
pub use checkpoint::{
    read_objectives, write_checkpoint, CheckpointPaths, OBJECTIVES_FILE, RECORDS_FILE,
};
pub use evaluation::{Evaluation, EvaluationStatus};
pub use ledger::{Ledger, LedgerStats};
pub use local::{LocalBackend, ObjectiveFn};
pub use subprocess::{parse_output, SubprocessBackend, DEFAULT_OUTPUT_MARKER};
