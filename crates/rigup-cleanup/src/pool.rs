use crate::backup::{BackupArchive, BackupArchiver};
use crate::targets::{Category, CleanupTarget};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Performs the actual removal. The seam exists so tests can inject
/// failures; production code uses [`FsRemover`].
pub trait Remover: Sync {
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Removes files, symlinks, and directory trees from the filesystem.
pub struct FsRemover;

impl Remover for FsRemover {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        let meta = path.symlink_metadata()?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Report without issuing any mutating call.
    pub dry_run: bool,
    /// Concurrent deletions within a category. 1 means sequential.
    pub parallelism: usize,
    /// Where pre-deletion archives go. `None` disables backups.
    pub backup_dir: Option<PathBuf>,
    /// Deletion attempts per target before recording a residual.
    pub delete_attempts: u32,
    /// Process names terminated between retry attempts (they may be
    /// holding the resource open).
    pub blocking_processes: Vec<String>,
    pub retry_delay: Duration,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallelism: 4,
            backup_dir: None,
            delete_attempts: 3,
            blocking_processes: Vec::new(),
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Removed,
    WouldRemove,
    Missing,
    /// Not processed because shutdown was requested.
    Skipped,
    Failed(String),
}

impl std::fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOutcome::Removed => write!(f, "removed"),
            TargetOutcome::WouldRemove => write!(f, "would-remove"),
            TargetOutcome::Missing => write!(f, "missing"),
            TargetOutcome::Skipped => write!(f, "skipped"),
            TargetOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub category: Category,
    pub path: PathBuf,
    pub outcome: TargetOutcome,
}

/// Aggregate result of a cleanup run. Dry-run and destructive reports are
/// structurally identical so tooling can diff them.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub targets: Vec<TargetReport>,
    pub backups: Vec<BackupArchive>,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn success(&self) -> bool {
        self.targets
            .iter()
            .all(|t| !matches!(t.outcome, TargetOutcome::Failed(_) | TargetOutcome::Skipped))
    }

    /// Targets that could not be removed and need manual attention.
    pub fn residuals(&self) -> Vec<&TargetReport> {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Failed(_)))
            .collect()
    }

    pub fn removed_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.outcome == TargetOutcome::Removed)
            .count()
    }
}

/// Process all targets with the filesystem remover.
pub fn process(targets: &[CleanupTarget], opts: &CleanupOptions) -> CleanupReport {
    process_with(targets, opts, &FsRemover, || false)
}

/// Process all targets category by category.
///
/// A category boundary is a synchronization point: every deletion of
/// category N completes (or is recorded as a residual) before category
/// N+1 starts. Within a category, up to `parallelism` deletions run
/// concurrently, a new one starting as soon as one finishes.
pub fn process_with(
    targets: &[CleanupTarget],
    opts: &CleanupOptions,
    remover: &dyn Remover,
    should_stop: impl Fn() -> bool + Sync,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let mut outcomes: Vec<Option<TargetOutcome>> = vec![None; targets.len()];

    // Categories run in first-appearance order.
    let mut categories: Vec<(Category, Vec<usize>)> = Vec::new();
    for (idx, target) in targets.iter().enumerate() {
        match categories.iter_mut().find(|(c, _)| *c == target.category) {
            Some((_, indices)) => indices.push(idx),
            None => categories.push((target.category, vec![idx])),
        }
    }

    for (category, indices) in &categories {
        if should_stop() {
            for &idx in indices {
                outcomes[idx] = Some(TargetOutcome::Skipped);
            }
            continue;
        }

        if !opts.dry_run {
            if let Some(ref backup_dir) = opts.backup_dir {
                let archiver = BackupArchiver::new(backup_dir);
                match archiver.archive_category(*category, targets) {
                    Ok(Some(archive)) => report.backups.push(archive),
                    Ok(None) => {}
                    Err(e) => {
                        // Cleanup must not be blocked by a failed backup,
                        // but the operator has to hear about it.
                        warn!("backup for category {category} failed: {e}");
                        report
                            .warnings
                            .push(format!("backup for category {category} failed: {e}"));
                    }
                }
            }
        }

        info!(
            "cleanup: category {category}: {} target(s){}",
            indices.len(),
            if opts.dry_run { " (dry run)" } else { "" }
        );

        if opts.dry_run {
            for &idx in indices {
                outcomes[idx] = Some(if targets[idx].exists {
                    TargetOutcome::WouldRemove
                } else {
                    TargetOutcome::Missing
                });
            }
        } else if opts.parallelism <= 1 || indices.len() <= 1 {
            for &idx in indices {
                outcomes[idx] = Some(if should_stop() {
                    TargetOutcome::Skipped
                } else {
                    delete_one(&targets[idx], opts, remover)
                });
            }
        } else {
            let queue: Mutex<VecDeque<usize>> = Mutex::new(indices.iter().copied().collect());
            let done: Mutex<Vec<(usize, TargetOutcome)>> = Mutex::new(Vec::new());
            let workers = opts.parallelism.min(indices.len());

            std::thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| loop {
                        if should_stop() {
                            break;
                        }
                        let next = queue.lock().map(|mut q| q.pop_front());
                        let Ok(Some(idx)) = next else { break };
                        let outcome = delete_one(&targets[idx], opts, remover);
                        if let Ok(mut d) = done.lock() {
                            d.push((idx, outcome));
                        }
                    });
                }
            });

            for (idx, outcome) in done.into_inner().unwrap_or_default() {
                outcomes[idx] = Some(outcome);
            }
            // Anything still queued when shutdown hit is reported, not lost.
            for idx in queue.into_inner().unwrap_or_default() {
                outcomes[idx] = Some(TargetOutcome::Skipped);
            }
        }
    }

    for (idx, target) in targets.iter().enumerate() {
        let outcome = outcomes[idx].take().unwrap_or(TargetOutcome::Skipped);
        report.targets.push(TargetReport {
            category: target.category,
            path: target.path.clone(),
            outcome,
        });
    }
    report
}

fn delete_one(target: &CleanupTarget, opts: &CleanupOptions, remover: &dyn Remover) -> TargetOutcome {
    if target.path.symlink_metadata().is_err() {
        debug!("cleanup: {} missing, nothing to do", target.path.display());
        return TargetOutcome::Missing;
    }

    let attempts = opts.delete_attempts.max(1);
    let mut attempt = 0;
    loop {
        match remover.remove(&target.path) {
            Ok(()) => {
                debug!("cleanup: removed {}", target.path.display());
                return TargetOutcome::Removed;
            }
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    warn!(
                        "cleanup: giving up on {} after {attempt} attempt(s): {e}",
                        target.path.display()
                    );
                    return TargetOutcome::Failed(e.to_string());
                }
                warn!(
                    "cleanup: attempt {attempt} failed for {}: {e}; retrying",
                    target.path.display()
                );
                terminate_blockers(&opts.blocking_processes);
                std::thread::sleep(opts.retry_delay);
            }
        }
    }
}

/// Terminate processes known to hold cleanup targets open. Best effort;
/// the retry that follows is the real test of whether it helped.
fn terminate_blockers(names: &[String]) {
    for name in names {
        let result = std::process::Command::new("pkill")
            .args(["-x", name])
            .output();
        match result {
            Ok(out) if out.status.success() => debug!("terminated blocking process '{name}'"),
            Ok(_) => debug!("no blocking process '{name}' found"),
            Err(e) => debug!("pkill for '{name}' unavailable: {e}"),
        }
    }
}
