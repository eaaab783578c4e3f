//! Checkpointed step execution for rigup pipelines.
//!
//! The executor drives an ordered list of steps against the checkpoint
//! store: completed steps are skipped, each success is persisted
//! immediately, and the first failure aborts the run with a persisted
//! diagnostic. Verification-class steps go through the recovery policy,
//! which tries category-specific remediations between retries.

pub mod action;
pub mod executor;
pub mod recovery;
pub mod signal;
pub mod step;

pub use action::{Action, ActionOutput, CommandAction};
pub use executor::{Executor, RunReport, StepResult, StepStatus};
pub use recovery::{verify, RecoveryPolicy, Rung, VerifiedAction, VerifyKind, VerifyOutcome};
pub use signal::{install_signal_handler, shutdown_requested};
pub use step::Step;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch action: {0}")]
    Launch(#[from] std::io::Error),
    #[error("invalid step definition: {0}")]
    InvalidStep(String),
    #[error(transparent)]
    State(#[from] rigup_state::StateError),
}
