use rigup_engine::VerifyKind;
use serde::Deserialize;
use std::path::Path;

/// Parsed `rigup.toml`. Every section is optional; a missing section gets
/// serde defaults so a minimal manifest stays minimal.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Repository checkout the pipelines operate on. Relative paths in
    /// steps and cleanup categories resolve against it.
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    /// Overrides the default state directory (also overridable with
    /// `--state-dir`, which wins).
    pub state_dir: Option<String>,

    #[serde(default)]
    pub provision: PipelineSection,

    #[serde(default)]
    pub teardown: PipelineSection,

    #[serde(default)]
    pub verify: VerifySection,

    #[serde(default)]
    pub cleanup: CleanupSection,

    #[serde(default)]
    pub terraform: TerraformSection,

    #[serde(default)]
    pub handoff: HandoffSection,
}

fn default_project_dir() -> String {
    ".".to_owned()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Checkpoint key; stable across runs, dotted-lowercase by convention.
    pub key: String,
    pub label: String,
    /// Run through `sh -c`.
    pub command: String,
    /// Working directory relative to `project_dir`.
    pub dir: Option<String>,
    /// Marks a verification step and selects its remediation ladder:
    /// one of "lint", "type-check", "unit-tests", "e2e", "generic".
    pub verify: Option<String>,
    /// Per-step override of `[verify] max_retries`.
    pub max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,
    /// Defaults to `<state-dir>/backups` when unset.
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub blocking_processes: Vec<String>,
    #[serde(default, rename = "category")]
    pub categories: Vec<CategorySection>,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            delete_attempts: default_delete_attempts(),
            backup_dir: None,
            blocking_processes: Vec::new(),
            categories: Vec::new(),
        }
    }
}

fn default_parallelism() -> usize {
    4
}

fn default_delete_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategorySection {
    /// One of "repo", "infra-local", "home-cache", "toolchain".
    pub name: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraformSection {
    #[serde(default = "default_terraform_program")]
    pub program: String,
    /// Environment directories relative to `project_dir`, in destroy order.
    #[serde(default)]
    pub env_dirs: Vec<String>,
}

impl Default for TerraformSection {
    fn default() -> Self {
        Self {
            program: default_terraform_program(),
            env_dirs: Vec::new(),
        }
    }
}

fn default_terraform_program() -> String {
    "terraform".to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffSection {
    #[serde(default)]
    pub enabled: bool,
    /// Command that pokes the privileged runner; empty means the operator
    /// runs the script by hand.
    #[serde(default)]
    pub trigger: Vec<String>,
    #[serde(default = "default_handoff_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_handoff_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for HandoffSection {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger: Vec::new(),
            timeout_secs: default_handoff_timeout_secs(),
            poll_interval_ms: default_handoff_poll_ms(),
        }
    }
}

fn default_handoff_timeout_secs() -> u64 {
    60
}

fn default_handoff_poll_ms() -> u64 {
    500
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read manifest {}: {e}", path.display()))?;
        toml::from_str(&raw)
            .map_err(|e| format!("failed to parse manifest {}: {e}", path.display()))
    }
}

pub fn parse_verify_kind(s: &str) -> Result<VerifyKind, String> {
    match s {
        "lint" => Ok(VerifyKind::Lint),
        "type-check" => Ok(VerifyKind::TypeCheck),
        "unit-tests" => Ok(VerifyKind::UnitTests),
        "e2e" => Ok(VerifyKind::EndToEnd),
        "generic" => Ok(VerifyKind::Generic),
        other => Err(format!(
            "manifest error: unknown verify kind '{other}' (expected lint, type-check, unit-tests, e2e, or generic)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manifest_gets_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.project_dir, ".");
        assert_eq!(config.verify.max_retries, 2);
        assert_eq!(config.cleanup.parallelism, 4);
        assert_eq!(config.cleanup.delete_attempts, 3);
        assert_eq!(config.terraform.program, "terraform");
        assert!(!config.handoff.enabled);
        assert!(config.provision.steps.is_empty());
    }

    #[test]
    fn full_manifest_parses() {
        let config: Config = toml::from_str(
            r#"
project_dir = "/work/rig"
state_dir = "~/.local/state/rigup"

[[provision.step]]
key = "toolchain.node"
label = "Install Node toolchain"
command = "mise install node@20"

[[provision.step]]
key = "verify.tests"
label = "Unit tests"
command = "npm test"
verify = "unit-tests"
max_retries = 3

[verify]
max_retries = 1

[cleanup]
parallelism = 8
delete_attempts = 2
blocking_processes = ["node"]

[[cleanup.category]]
name = "repo"
paths = ["node_modules", "dist"]
globs = ["*.log"]

[[cleanup.category]]
name = "home-cache"
paths = ["~/.npm"]

[terraform]
program = "tofu"
env_dirs = ["infra/staging", "infra/production"]

[handoff]
enabled = true
trigger = ["sudo", "systemctl", "start", "rig-cleanup"]
timeout_secs = 120
poll_interval_ms = 250

[[teardown.step]]
key = "repo.archive-notes"
label = "Archive working notes"
command = "tar czf /tmp/notes.tgz notes/"
"#,
        )
        .unwrap();

        assert_eq!(config.provision.steps.len(), 2);
        assert_eq!(config.provision.steps[1].verify.as_deref(), Some("unit-tests"));
        assert_eq!(config.provision.steps[1].max_retries, Some(3));
        assert_eq!(config.verify.max_retries, 1);
        assert_eq!(config.cleanup.categories.len(), 2);
        assert_eq!(config.cleanup.categories[0].paths, vec!["node_modules", "dist"]);
        assert_eq!(config.terraform.env_dirs.len(), 2);
        assert!(config.handoff.enabled);
        assert_eq!(config.handoff.trigger.len(), 4);
        assert_eq!(config.teardown.steps.len(), 1);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result: Result<Config, _> = toml::from_str("unknown_knob = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn verify_kinds_parse() {
        assert_eq!(parse_verify_kind("lint").unwrap(), VerifyKind::Lint);
        assert_eq!(parse_verify_kind("type-check").unwrap(), VerifyKind::TypeCheck);
        assert_eq!(parse_verify_kind("unit-tests").unwrap(), VerifyKind::UnitTests);
        assert_eq!(parse_verify_kind("e2e").unwrap(), VerifyKind::EndToEnd);
        assert_eq!(parse_verify_kind("generic").unwrap(), VerifyKind::Generic);
        assert!(parse_verify_kind("vibes").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/no/such/rigup.toml")).unwrap_err();
        assert!(err.starts_with("failed to read manifest"));
    }

    #[test]
    fn load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rigup.toml");
        std::fs::write(&path, "[[provision.step]]\nkey = 42\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.starts_with("failed to parse manifest"));
    }
}
