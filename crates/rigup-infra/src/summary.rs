use crate::terraform::DestroyResult;
use crate::InfraError;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Write the destroy summary as a JSON array, atomically.
///
/// An empty result set removes any stale summary from a prior run
/// instead of writing `[]`: "nothing attempted this run" must not look
/// like "zero environments processed successfully".
pub fn emit_summary(path: &Path, results: &[DestroyResult]) -> Result<(), InfraError> {
    if results.is_empty() {
        match std::fs::remove_file(path) {
            Ok(()) => info!("removed stale destroy summary {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no destroy summary to clear");
            }
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, results)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    fsync_dir(parent)?;

    info!(
        "wrote destroy summary for {} environment(s) to {}",
        results.len(),
        path.display()
    );
    Ok(())
}

pub fn read_summary(path: &Path) -> Result<Vec<DestroyResult>, InfraError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terraform::DestroyStatus;

    fn sample(env: &str, status: DestroyStatus) -> DestroyResult {
        DestroyResult {
            environment: env.to_owned(),
            status,
            backend: "local".to_owned(),
            message: "destroyed".to_owned(),
        }
    }

    #[test]
    fn summary_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("destroy-summary.json");
        let results = vec![
            sample("staging", DestroyStatus::Success),
            sample("production", DestroyStatus::Warning),
        ];
        emit_summary(&path, &results).unwrap();
        assert_eq!(read_summary(&path).unwrap(), results);
    }

    #[test]
    fn status_serializes_lowercase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        emit_summary(&path, &[sample("env", DestroyStatus::Skipped)]).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"skipped\""));
        assert!(!raw.contains("Skipped"));
    }

    #[test]
    fn empty_results_clear_stale_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        emit_summary(&path, &[sample("old", DestroyStatus::Success)]).unwrap();
        assert!(path.exists());

        emit_summary(&path, &[]).unwrap();
        assert!(!path.exists(), "stale summary must be removed, not emptied");
    }

    #[test]
    fn empty_results_with_no_prior_summary_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        emit_summary(&path, &[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn order_is_preserved_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let results = vec![
            sample("staging", DestroyStatus::Success),
            sample("production", DestroyStatus::Success),
        ];
        emit_summary(&path, &results).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let staging = raw.find("staging").unwrap();
        let production = raw.find("production").unwrap();
        assert!(staging < production);
    }
}
