use crate::layout::Layout;
use crate::{fsync_dir, StateError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const CHECKSUM_PREFIX: &str = "# checksum=";
const DONE_PREFIX: &str = "done.";
const LAST_FAILURE_KEY: &str = "last_failure";

/// Record of a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    /// RFC 3339 timestamp of when the step finished.
    pub timestamp: String,
}

/// In-memory image of one pipeline's checkpoint file.
///
/// Owned exclusively by the execution engine; mutated only after an action
/// reports success and persisted after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    completed: BTreeMap<String, CompletionRecord>,
    last_failure: Option<String>,
}

/// Step keys become state-file keys, so they must stay line-format safe.
pub fn validate_step_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() || key.len() > 64 {
        return Err(StateError::Corrupt(
            "step key must be 1-64 characters".to_owned(),
        ));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(StateError::Corrupt(format!(
            "step key '{key}' must match [a-z0-9._-]"
        )));
    }
    Ok(())
}

impl PipelineState {
    pub fn is_done(&self, key: &str) -> bool {
        self.completed.contains_key(key)
    }

    pub fn mark_done(&mut self, key: &str) {
        self.completed.insert(
            key.to_owned(),
            CompletionRecord {
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    pub fn completed(&self) -> &BTreeMap<String, CompletionRecord> {
        &self.completed
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Record the diagnostic for an aborted run. Newlines are flattened so
    /// the value stays a single `key=value` line.
    pub fn set_last_failure(&mut self, message: impl Into<String>) {
        let flat = message.into().replace(['\n', '\r'], "; ");
        self.last_failure = Some(flat);
    }

    pub fn clear_last_failure(&mut self) {
        self.last_failure = None;
    }

    /// Serialize to the sorted `key=value` body (no checksum header).
    fn to_body(&self) -> String {
        // BTreeMap iteration is sorted; "done." entries precede the
        // "last_failure" key lexicographically, keeping the body stable.
        let mut body = String::new();
        for (key, record) in &self.completed {
            body.push_str(DONE_PREFIX);
            body.push_str(key);
            body.push('=');
            body.push_str(&record.timestamp);
            body.push('\n');
        }
        if let Some(ref failure) = self.last_failure {
            body.push_str(LAST_FAILURE_KEY);
            body.push('=');
            body.push_str(failure);
            body.push('\n');
        }
        body
    }

    fn from_body(body: &str) -> Self {
        let mut state = Self::default();
        for line in body.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("ignoring malformed state line: {line}");
                continue;
            };
            if let Some(step_key) = key.strip_prefix(DONE_PREFIX) {
                state.completed.insert(
                    step_key.to_owned(),
                    CompletionRecord {
                        timestamp: value.to_owned(),
                    },
                );
            } else if key == LAST_FAILURE_KEY {
                state.last_failure = Some(value.to_owned());
            } else {
                warn!("ignoring unknown state key: {key}");
            }
        }
        state
    }
}

/// Durable store for one pipeline's `PipelineState`.
///
/// `save` writes the sorted body to a temp file with a blake3 checksum
/// header, atomically replaces the primary state file, then copies it over
/// the backup slot. `load` verifies the checksum and falls back to the
/// backup exactly once; with nothing valid on disk it returns an empty
/// state (first run).
pub struct StateStore {
    path: PathBuf,
    backup: PathBuf,
}

impl StateStore {
    pub fn new(layout: &Layout, pipeline: &str) -> Self {
        Self {
            path: layout.state_file(pipeline),
            backup: layout.state_backup(pipeline),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn save(&self, state: &PipelineState) -> Result<(), StateError> {
        let body = state.to_body();
        let checksum = blake3::hash(body.as_bytes()).to_hex().to_string();
        let content = format!("{CHECKSUM_PREFIX}{checksum}\n{body}");

        let dir = self
            .path
            .parent()
            .ok_or_else(|| StateError::Corrupt("state file has no parent directory".to_owned()))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        fsync_dir(dir)?;

        // Backup is a copy of the just-committed primary, kept one write
        // behind never more: the prior snapshot is only replaced after the
        // new primary is durable.
        fs::copy(&self.path, &self.backup)?;
        debug!("state saved: {}", self.path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<PipelineState, StateError> {
        match Self::load_file(&self.path)? {
            LoadOutcome::Valid(state) => return Ok(state),
            LoadOutcome::Missing => {}
            LoadOutcome::Corrupt(reason) => {
                warn!(
                    "state file {} is corrupt ({reason}); trying backup",
                    self.path.display()
                );
            }
        }
        // Exactly one recovery attempt — backups are not chained.
        match Self::load_file(&self.backup)? {
            LoadOutcome::Valid(state) => {
                info!("recovered state from backup {}", self.backup.display());
                Ok(state)
            }
            LoadOutcome::Missing => Ok(PipelineState::default()),
            LoadOutcome::Corrupt(reason) => {
                warn!(
                    "state backup {} is also unusable ({reason}); starting from empty state",
                    self.backup.display()
                );
                Ok(PipelineState::default())
            }
        }
    }

    /// Remove the state file and its backup, forcing a full re-run.
    pub fn reset(&self) -> Result<(), StateError> {
        for path in [&self.path, &self.backup] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        info!("state reset: {}", self.path.display());
        Ok(())
    }

    fn load_file(path: &PathBuf) -> Result<LoadOutcome, StateError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) => return Err(StateError::Io(e)),
        };

        let body = if let Some(rest) = content.strip_prefix(CHECKSUM_PREFIX) {
            let Some((expected, body)) = rest.split_once('\n') else {
                return Ok(LoadOutcome::Corrupt("truncated checksum header".to_owned()));
            };
            let actual = blake3::hash(body.as_bytes()).to_hex().to_string();
            if actual != expected {
                return Ok(LoadOutcome::Corrupt(format!(
                    "checksum mismatch: expected {expected}, got {actual}"
                )));
            }
            body
        } else {
            // Headerless files are accepted as-is (hand-edited or legacy).
            content.as_str()
        };

        Ok(LoadOutcome::Valid(PipelineState::from_body(body)))
    }
}

enum LoadOutcome {
    Valid(PipelineState),
    Missing,
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.initialize().unwrap();
        (dir, StateStore::new(&layout, "provision"))
    }

    #[test]
    fn empty_store_loads_default() {
        let (_dir, store) = setup();
        let state = store.load().unwrap();
        assert!(state.completed().is_empty());
        assert!(state.last_failure().is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("install-toolchain");
        state.mark_done("configure-repo");
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.is_done("install-toolchain"));
        assert!(loaded.is_done("configure-repo"));
        assert!(!loaded.is_done("provision-cloud"));
    }

    #[test]
    fn body_is_sorted_and_checksummed() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("zz-last");
        state.mark_done("aa-first");
        store.save(&state).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with(CHECKSUM_PREFIX));
        let keys: Vec<&str> = lines.map(|l| l.split('=').next().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted, "body lines must be sorted");
    }

    #[test]
    fn corrupt_primary_recovers_from_backup() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("step-one");
        store.save(&state).unwrap();

        // Corrupt the body while leaving the checksum header in place.
        let content = fs::read_to_string(store.path()).unwrap();
        let tampered = content.replace("step-one", "step-two");
        fs::write(store.path(), tampered).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.is_done("step-one"), "backup must be used verbatim");
        assert!(!loaded.is_done("step-two"));
    }

    #[test]
    fn corrupt_primary_missing_backup_yields_empty() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("step-one");
        store.save(&state).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), content.replace("step-one", "tampered")).unwrap();
        fs::remove_file(&store.backup).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.completed().is_empty(), "no valid file means first run");
    }

    #[test]
    fn corrupt_primary_and_backup_yields_empty() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("step-one");
        store.save(&state).unwrap();

        fs::write(store.path(), "# checksum=deadbeef\ngarbage\n").unwrap();
        fs::write(&store.backup, "# checksum=deadbeef\ngarbage\n").unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.completed().is_empty());
    }

    #[test]
    fn missing_primary_falls_back_to_backup() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("step-one");
        store.save(&state).unwrap();
        fs::remove_file(store.path()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.is_done("step-one"));
    }

    #[test]
    fn headerless_file_is_accepted() {
        let (_dir, store) = setup();
        fs::write(store.path(), "done.manual-step=2025-01-01T00:00:00Z\n").unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.is_done("manual-step"));
    }

    #[test]
    fn last_failure_roundtrip() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.set_last_failure("provision cloud: exit code 1\nstderr tail");
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        let failure = loaded.last_failure().unwrap();
        assert!(failure.contains("provision cloud"));
        assert!(!failure.contains('\n'), "diagnostics must be flattened");
    }

    #[test]
    fn reset_removes_both_files() {
        let (_dir, store) = setup();
        let mut state = PipelineState::default();
        state.mark_done("step-one");
        store.save(&state).unwrap();

        store.reset().unwrap();
        assert!(!store.path().exists());
        assert!(!store.backup.exists());
        assert!(store.load().unwrap().completed().is_empty());
    }

    #[test]
    fn reset_on_empty_store_is_noop() {
        let (_dir, store) = setup();
        store.reset().unwrap();
    }

    #[test]
    fn pipelines_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.initialize().unwrap();
        let provision = StateStore::new(&layout, "provision");
        let teardown = StateStore::new(&layout, "teardown");

        let mut state = PipelineState::default();
        state.mark_done("only-provision");
        provision.save(&state).unwrap();

        assert!(!teardown.load().unwrap().is_done("only-provision"));
    }

    #[test]
    fn validate_step_key_accepts_reasonable_keys() {
        assert!(validate_step_key("install-node").is_ok());
        assert!(validate_step_key("e2e_tests").is_ok());
        assert!(validate_step_key("toolchain.node").is_ok());
        assert!(validate_step_key("step9").is_ok());
    }

    #[test]
    fn validate_step_key_rejects_bad_keys() {
        assert!(validate_step_key("").is_err());
        assert!(validate_step_key("Has Caps").is_err());
        assert!(validate_step_key("key=value").is_err());
        assert!(validate_step_key(&"x".repeat(65)).is_err());
    }
}
