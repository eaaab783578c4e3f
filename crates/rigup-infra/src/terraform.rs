use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Backend kinds whose state lives outside the environment directory.
/// Destroying local resources says nothing about these; the operator has
/// to verify remote state separately.
const REMOTE_BACKEND_KINDS: &[&str] = &[
    "s3", "gcs", "azurerm", "remote", "http", "consul", "pg", "kubernetes", "oss", "cos",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyStatus {
    Success,
    Warning,
    Failure,
    Skipped,
}

impl std::fmt::Display for DestroyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestroyStatus::Success => write!(f, "success"),
            DestroyStatus::Warning => write!(f, "warning"),
            DestroyStatus::Failure => write!(f, "failure"),
            DestroyStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One row of the destroy summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyResult {
    pub environment: String,
    pub status: DestroyStatus,
    pub backend: String,
    pub message: String,
}

/// The terraform operations the coordinator needs. The CLI implementation
/// shells out; tests script the responses.
pub trait TerraformRunner {
    fn available(&self) -> bool;
    fn init(&self, dir: &Path) -> Result<(), String>;
    fn destroy(&self, dir: &Path) -> Result<(), String>;
    /// Resource addresses still present in state after destroy. `Err`
    /// means the inventory could not be taken at all.
    fn state_list(&self, dir: &Path) -> Result<Vec<String>, String>;
}

/// Shells out to the terraform binary.
pub struct TerraformCli {
    program: String,
}

impl TerraformCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, String> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| format!("failed to launch {}: {e}", self.program))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let text = if stderr.trim().is_empty() { stdout } else { stderr };
            Err(tail(&text))
        }
    }
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformRunner for TerraformCli {
    fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn init(&self, dir: &Path) -> Result<(), String> {
        self.run(dir, &["init", "-input=false", "-no-color"]).map(|_| ())
    }

    fn destroy(&self, dir: &Path) -> Result<(), String> {
        self.run(dir, &["destroy", "-auto-approve", "-input=false", "-no-color"])
            .map(|_| ())
    }

    fn state_list(&self, dir: &Path) -> Result<Vec<String>, String> {
        let out = self.run(dir, &["state", "list", "-no-color"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }
}

/// Last few lines of a command's output, flattened for a one-line message.
fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("; ")
}

/// Scan `*.tf` files in `dir` for a `backend "<kind>"` declaration.
///
/// A pattern match, not an HCL parse: good enough to tell local from
/// remote state, which is all the coordinator needs.
pub fn detect_backend_kind(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tf") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("backend ") {
                let rest = rest.trim_start();
                if let Some(stripped) = rest.strip_prefix('"') {
                    if let Some(end) = stripped.find('"') {
                        let kind = &stripped[..end];
                        debug!("backend '{kind}' declared in {}", path.display());
                        return Some(kind.to_owned());
                    }
                }
            }
        }
    }
    None
}

fn is_remote_backend(kind: &str) -> bool {
    REMOTE_BACKEND_KINDS.contains(&kind)
}

/// Runs `init` then `destroy` across environment directories and
/// classifies each outcome. Never aborts on a single environment's
/// failure; every directory gets a result row.
pub struct DestroyCoordinator<'a> {
    runner: &'a dyn TerraformRunner,
    dry_run: bool,
}

impl<'a> DestroyCoordinator<'a> {
    pub fn new(runner: &'a dyn TerraformRunner, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    /// Results preserve the input order: operators read the summary
    /// top to bottom and expect the configured environment order.
    pub fn destroy_all(&self, env_dirs: &[PathBuf]) -> Vec<DestroyResult> {
        let mut results = Vec::with_capacity(env_dirs.len());
        let available = self.runner.available();
        for dir in env_dirs {
            results.push(self.destroy_one(dir, available));
        }
        results
    }

    fn destroy_one(&self, dir: &Path, available: bool) -> DestroyResult {
        let environment = dir
            .file_name()
            .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned());
        let backend = detect_backend_kind(dir).unwrap_or_else(|| "local".to_owned());
        let remote_note = if is_remote_backend(&backend) {
            warn!(
                "environment {environment}: remote backend '{backend}', \
                 remote state may need independent verification"
            );
            format!("; remote backend '{backend}' may hold state needing independent verification")
        } else {
            String::new()
        };

        if self.dry_run {
            return DestroyResult {
                environment,
                status: DestroyStatus::Skipped,
                backend,
                message: format!("dry run: destroy not attempted{remote_note}"),
            };
        }
        if !available {
            return DestroyResult {
                environment,
                status: DestroyStatus::Skipped,
                backend,
                message: format!("terraform not available{remote_note}"),
            };
        }

        info!("destroying environment {environment} (backend: {backend})");
        if let Err(e) = self.runner.init(dir) {
            return DestroyResult {
                environment,
                status: DestroyStatus::Failure,
                backend,
                message: format!("init failed: {e}"),
            };
        }
        if let Err(e) = self.runner.destroy(dir) {
            return DestroyResult {
                environment,
                status: DestroyStatus::Failure,
                backend,
                message: format!("destroy failed: {e}"),
            };
        }

        match self.runner.state_list(dir) {
            Ok(residual) if !residual.is_empty() => DestroyResult {
                environment,
                status: DestroyStatus::Warning,
                backend,
                message: format!(
                    "destroy succeeded but residual state remains ({} resource(s)){remote_note}",
                    residual.len()
                ),
            },
            // An unreadable inventory is not evidence of residual state.
            Ok(_) | Err(_) => DestroyResult {
                environment,
                status: DestroyStatus::Success,
                backend,
                message: format!("destroyed{remote_note}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    /// Scripted responses keyed by environment directory name.
    #[derive(Default)]
    struct ScriptedRunner {
        available: bool,
        init_fail: Vec<String>,
        destroy_fail: Vec<String>,
        residual: HashMap<String, Vec<String>>,
        state_list_fail: Vec<String>,
    }

    impl ScriptedRunner {
        fn name(dir: &Path) -> String {
            dir.file_name().unwrap().to_string_lossy().into_owned()
        }
    }

    impl TerraformRunner for ScriptedRunner {
        fn available(&self) -> bool {
            self.available
        }
        fn init(&self, dir: &Path) -> Result<(), String> {
            if self.init_fail.contains(&Self::name(dir)) {
                Err("backend initialization error".to_owned())
            } else {
                Ok(())
            }
        }
        fn destroy(&self, dir: &Path) -> Result<(), String> {
            if self.destroy_fail.contains(&Self::name(dir)) {
                Err("resource deletion denied".to_owned())
            } else {
                Ok(())
            }
        }
        fn state_list(&self, dir: &Path) -> Result<Vec<String>, String> {
            let name = Self::name(dir);
            if self.state_list_fail.contains(&name) {
                return Err("state backend unreachable".to_owned());
            }
            Ok(self.residual.get(&name).cloned().unwrap_or_default())
        }
    }

    fn env_dirs(root: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let dir = root.join(n);
                fs::create_dir_all(&dir).unwrap();
                dir
            })
            .collect()
    }

    #[test]
    fn results_preserve_input_order() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["staging", "production", "sandbox"]);
        let runner = ScriptedRunner {
            available: true,
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        let names: Vec<&str> = results.iter().map(|r| r.environment.as_str()).collect();
        assert_eq!(names, vec!["staging", "production", "sandbox"]);
        assert!(results.iter().all(|r| r.status == DestroyStatus::Success));
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["a", "b", "c"]);
        let runner = ScriptedRunner {
            available: true,
            destroy_fail: vec!["b".to_owned()],
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, DestroyStatus::Success);
        assert_eq!(results[1].status, DestroyStatus::Failure);
        assert!(results[1].message.contains("destroy failed"));
        assert_eq!(results[2].status, DestroyStatus::Success);
    }

    #[test]
    fn init_failure_is_a_failure() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        let runner = ScriptedRunner {
            available: true,
            init_fail: vec!["env".to_owned()],
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results[0].status, DestroyStatus::Failure);
        assert!(results[0].message.contains("init failed"));
    }

    #[test]
    fn residual_state_downgrades_to_warning() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        let mut residual = HashMap::new();
        residual.insert("env".to_owned(), vec!["aws_s3_bucket.leftover".to_owned()]);
        let runner = ScriptedRunner {
            available: true,
            residual,
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results[0].status, DestroyStatus::Warning);
        assert!(results[0].message.contains("residual state remains"));
    }

    #[test]
    fn unreadable_inventory_is_still_success() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        let runner = ScriptedRunner {
            available: true,
            state_list_fail: vec!["env".to_owned()],
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results[0].status, DestroyStatus::Success);
    }

    #[test]
    fn dry_run_skips_without_touching_the_runner() {
        struct PanickyRunner;
        impl TerraformRunner for PanickyRunner {
            fn available(&self) -> bool {
                true
            }
            fn init(&self, _: &Path) -> Result<(), String> {
                panic!("init must not run in dry-run mode")
            }
            fn destroy(&self, _: &Path) -> Result<(), String> {
                panic!("destroy must not run in dry-run mode")
            }
            fn state_list(&self, _: &Path) -> Result<Vec<String>, String> {
                panic!("state_list must not run in dry-run mode")
            }
        }

        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        let results = DestroyCoordinator::new(&PanickyRunner, true).destroy_all(&dirs);
        assert_eq!(results[0].status, DestroyStatus::Skipped);
        assert!(results[0].message.contains("dry run"));
    }

    #[test]
    fn unavailable_tool_skips() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        let runner = ScriptedRunner::default();
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results[0].status, DestroyStatus::Skipped);
        assert!(results[0].message.contains("not available"));
    }

    #[test]
    fn backend_kind_detected_from_tf_files() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("main.tf"),
            "terraform {\n  backend \"s3\" {\n    bucket = \"x\"\n  }\n}\n",
        )
        .unwrap();
        assert_eq!(detect_backend_kind(root.path()).as_deref(), Some("s3"));
    }

    #[test]
    fn no_backend_declaration_means_none() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("main.tf"), "resource \"null_resource\" \"x\" {}\n").unwrap();
        assert_eq!(detect_backend_kind(root.path()), None);
    }

    #[test]
    fn remote_backend_noted_in_message() {
        let root = tempfile::tempdir().unwrap();
        let dirs = env_dirs(root.path(), &["env"]);
        fs::write(
            dirs[0].join("backend.tf"),
            "terraform {\n  backend \"gcs\" {}\n}\n",
        )
        .unwrap();
        let runner = ScriptedRunner {
            available: true,
            ..ScriptedRunner::default()
        };
        let results = DestroyCoordinator::new(&runner, false).destroy_all(&dirs);
        assert_eq!(results[0].backend, "gcs");
        assert_eq!(results[0].status, DestroyStatus::Success);
        assert!(results[0].message.contains("independent verification"));
    }
}
