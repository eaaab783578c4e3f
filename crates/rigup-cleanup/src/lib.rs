//! Destructive-cleanup engine for rigup teardown.
//!
//! Configuration is expanded into concrete filesystem targets grouped by
//! category; destructive runs take one compressed snapshot per category
//! before any deletion, then delete with bounded parallelism. Per-target
//! failures never abort the pool — teardown degrades gracefully and the
//! final report lists every residual path.

pub mod backup;
pub mod pool;
pub mod targets;

pub use backup::{BackupArchive, BackupArchiver};
pub use pool::{
    process, process_with, CleanupOptions, CleanupReport, FsRemover, Remover, TargetOutcome,
    TargetReport,
};
pub use targets::{resolve, Category, CategorySpec, CleanupConfig, CleanupTarget};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("cleanup I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid glob pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("unknown cleanup category: {0}")]
    UnknownCategory(String),
}
