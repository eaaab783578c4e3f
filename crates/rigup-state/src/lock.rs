use crate::StateError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Advisory lock on the state root.
///
/// Concurrent rigup invocations against the same state root are out of
/// contract; the lock turns them into a clean startup error instead of a
/// last-writer-wins race. Released on drop.
pub struct RunLock {
    lock_file: File,
}

impl RunLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        file.try_lock_exclusive()
            .map_err(|_| StateError::LockHeld(lock_path.display().to_string()))?;

        Ok(Self { lock_file: file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        {
            let _lock = RunLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        let _lock = RunLock::acquire(&lock_path).unwrap();
        assert!(matches!(
            RunLock::acquire(&lock_path),
            Err(StateError::LockHeld(_))
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        {
            let _lock = RunLock::acquire(&lock_path).unwrap();
        }
        assert!(RunLock::acquire(&lock_path).is_ok());
    }
}
