use crate::StateError;
use std::path::{Path, PathBuf};

/// Well-known paths under a rigup state root.
///
/// One state root serves one repository checkout. Both pipelines keep their
/// checkpoint files here, alongside the destroy summary, the privileged
/// handoff script, and the backup archives taken before destructive cleanup.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the state root and its subdirectories.
    pub fn initialize(&self) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.archive_dir())?;
        Ok(())
    }

    /// Checkpoint file for a pipeline ("provision" or "teardown").
    pub fn state_file(&self, pipeline: &str) -> PathBuf {
        self.root.join(format!("{pipeline}.state"))
    }

    /// Backup slot for a pipeline's checkpoint file.
    pub fn state_backup(&self, pipeline: &str) -> PathBuf {
        self.root.join(format!("{pipeline}.state.bak"))
    }

    /// Destroy summary consumed by a separate reporting process.
    pub fn summary_file(&self) -> PathBuf {
        self.root.join("destroy-summary.json")
    }

    /// Marker script executed by the privileged runner; its disappearance
    /// is the completion signal.
    pub fn handoff_script(&self) -> PathBuf {
        self.root.join("privileged-cleanup.sh")
    }

    /// Directory for pre-deletion backup archives.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("state"));
        layout.initialize().unwrap();
        assert!(layout.root().is_dir());
        assert!(layout.archive_dir().is_dir());
    }

    #[test]
    fn paths_are_under_root() {
        let layout = Layout::new("/tmp/rigup-test");
        assert!(layout.state_file("provision").starts_with("/tmp/rigup-test"));
        assert!(layout
            .state_backup("teardown")
            .to_string_lossy()
            .ends_with("teardown.state.bak"));
        assert!(layout.summary_file().ends_with("destroy-summary.json"));
        assert!(layout.handoff_script().ends_with("privileged-cleanup.sh"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("state"));
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }
}
