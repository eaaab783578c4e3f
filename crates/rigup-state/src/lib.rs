//! Durable checkpoint state for rigup pipelines.
//!
//! This crate provides the persistence layer: a `StateStore` holding which
//! pipeline steps have completed (sorted `key=value` lines behind a blake3
//! checksum header, with a single backup slot for corruption recovery),
//! the `Layout` of well-known paths under a state root, and the advisory
//! `RunLock` that keeps two rigup processes from interleaving a run.

pub mod checkpoint;
pub mod layout;
pub mod lock;

pub use checkpoint::{validate_step_key, CompletionRecord, PipelineState, StateStore};
pub use layout::Layout;
pub use lock::RunLock;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file corrupt: {0}")]
    Corrupt(String),
    #[error("state lock is held by another rigup process: {0}")]
    LockHeld(String),
}
