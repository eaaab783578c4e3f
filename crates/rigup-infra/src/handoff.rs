use crate::InfraError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a handoff attempt.
///
/// `ManualActionRequired` covers both "trigger failed" and "triggered but
/// still present at timeout": presence of the marker is the only signal,
/// so a crashed privileged process and a slow one look identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Completed,
    ManualActionRequired { script: PathBuf },
}

/// Hands cleanup work that needs elevated privileges to a separate
/// process through the filesystem.
///
/// The marker script is written to a well-known path, a trigger command
/// optionally pokes the privileged runner, and the script's disappearance
/// is the sole completion signal.
pub struct HandoffSignaler {
    script_path: PathBuf,
    trigger: Option<Vec<String>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl HandoffSignaler {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            trigger: None,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }

    /// Command run after the script is written, e.g. a systemd path unit
    /// kick or a sudo wrapper. Empty means "the operator runs it".
    #[must_use]
    pub fn trigger(mut self, command: Vec<String>) -> Self {
        self.trigger = if command.is_empty() { None } else { Some(command) };
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Write the marker script, fire the trigger, poll until the script
    /// disappears or the timeout elapses.
    pub fn dispatch(&self, script_content: &str) -> Result<HandoffOutcome, InfraError> {
        if let Some(parent) = self.script_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.script_path, script_content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.script_path, std::fs::Permissions::from_mode(0o700))?;
        }
        info!(
            "handoff: wrote privileged cleanup script to {}",
            self.script_path.display()
        );

        if let Some(trigger) = &self.trigger {
            match Command::new(&trigger[0]).args(&trigger[1..]).status() {
                Ok(status) if status.success() => {
                    debug!("handoff: trigger command succeeded");
                }
                Ok(status) => {
                    // The operator may still run the script by hand, so
                    // polling continues either way.
                    warn!("handoff: trigger command exited with {status}");
                }
                Err(e) => warn!("handoff: could not launch trigger command: {e}"),
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if !self.script_path.exists() {
                info!("handoff: privileged cleanup completed");
                return Ok(HandoffOutcome::Completed);
            }
            if Instant::now() >= deadline {
                warn!(
                    "handoff: script still present after {:?}; run it manually: {}",
                    self.timeout,
                    self.script_path.display()
                );
                return Ok(HandoffOutcome::ManualActionRequired {
                    script: self.script_path.clone(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
