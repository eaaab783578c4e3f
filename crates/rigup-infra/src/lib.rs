//! Infrastructure teardown support for rigup.
//!
//! Three pieces: a destroy coordinator that walks terraform environment
//! directories and classifies each outcome, a summary emitter that writes
//! the machine-readable destroy summary, and a handoff signaler for the
//! cleanup work that must run in a higher-privilege context.

pub mod handoff;
pub mod summary;
pub mod terraform;

pub use handoff::{HandoffOutcome, HandoffSignaler};
pub use summary::{emit_summary, read_summary};
pub use terraform::{
    detect_backend_kind, DestroyCoordinator, DestroyResult, DestroyStatus, TerraformCli,
    TerraformRunner,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("infra I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("summary serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
