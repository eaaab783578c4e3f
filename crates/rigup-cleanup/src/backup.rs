use crate::targets::{Category, CleanupTarget};
use crate::CleanupError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A compressed pre-deletion snapshot of one category.
#[derive(Debug, Clone)]
pub struct BackupArchive {
    pub category: Category,
    pub archive_path: PathBuf,
    pub created_at: String,
}

/// Best-effort archiver run before any deletion in a category.
///
/// Archiving failure is the caller's warning to surface; it must never
/// block deletion.
pub struct BackupArchiver {
    archive_dir: PathBuf,
}

impl BackupArchiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    /// Snapshot every currently-existing target of `category` into one
    /// `<category>-<timestamp>.tar.zst`. Returns `None` when the category
    /// has nothing on disk to archive.
    pub fn archive_category(
        &self,
        category: Category,
        targets: &[CleanupTarget],
    ) -> Result<Option<BackupArchive>, CleanupError> {
        let existing: Vec<&CleanupTarget> = targets
            .iter()
            .filter(|t| t.category == category && t.path.symlink_metadata().is_ok())
            .collect();
        if existing.is_empty() {
            debug!("backup: nothing on disk for category {category}");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.archive_dir)?;
        let created_at = chrono::Utc::now().to_rfc3339();
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let archive_path = self.archive_dir.join(format!("{category}-{stamp}.tar.zst"));

        let file = File::create(&archive_path)?;
        let encoder = zstd::stream::Encoder::new(file, 3)?;
        let mut builder = tar::Builder::new(encoder);
        // Symlinks are archived as links, not followed into their targets.
        builder.follow_symlinks(false);

        for target in &existing {
            let name = archive_name(&target.path);
            let meta = target.path.symlink_metadata()?;
            if meta.is_dir() {
                builder.append_dir_all(&name, &target.path)?;
            } else {
                builder.append_path_with_name(&target.path, &name)?;
            }
        }

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        info!("backup: archived {} -> {}", category, archive_path.display());
        Ok(Some(BackupArchive {
            category,
            archive_path,
            created_at,
        }))
    }
}

/// Entry name inside the archive: the absolute path with the leading
/// separator stripped, the same shape `tar -P` would produce.
fn archive_name(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::RootDir | std::path::Component::Prefix(_)))
        .collect()
}
