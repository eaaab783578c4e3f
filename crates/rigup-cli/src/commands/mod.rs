pub mod doctor;
pub mod provision;
pub mod reset;
pub mod status;
pub mod teardown;

use crate::config::{parse_verify_kind, Config, StepSpec};
use indicatif::{ProgressBar, ProgressStyle};
use rigup_engine::{Action, CommandAction, RecoveryPolicy, Step, StepStatus, VerifiedAction};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;
/// Teardown finished but left residual paths needing manual attention.
pub const EXIT_RESIDUAL: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_step_status(status: &str) -> String {
    use console::Style;
    match status {
        "done" | "executed" => Style::new().green().apply_to(status).to_string(),
        "pending" => Style::new().yellow().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        "skipped" => Style::new().dim().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Executed => "executed",
        StepStatus::Skipped => "skipped",
        StepStatus::Failed => "failed",
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn project_dir(config: &Config) -> PathBuf {
    expand_tilde(&config.project_dir)
}

/// Turn manifest step specs into executable steps. Verification steps are
/// wrapped with their remediation ladder; everything else runs plain.
pub fn build_steps(
    specs: &[StepSpec],
    project_dir: &Path,
    default_retries: u32,
) -> Result<Vec<Step>, String> {
    specs
        .iter()
        .map(|spec| {
            let workdir = match &spec.dir {
                Some(d) => project_dir.join(d),
                None => project_dir.to_path_buf(),
            };
            let command: Box<dyn Action> =
                Box::new(CommandAction::shell(&spec.command).current_dir(&workdir));
            let action: Box<dyn Action> = match &spec.verify {
                Some(kind) => {
                    let kind = parse_verify_kind(kind)?;
                    let retries = spec.max_retries.unwrap_or(default_retries);
                    Box::new(VerifiedAction::new(
                        spec.label.clone(),
                        command,
                        RecoveryPolicy::standard(kind, &workdir),
                        retries,
                    ))
                }
                None => command,
            };
            Step::new(&spec.key, &spec.label, action).map_err(|e| format!("manifest error: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_MANIFEST_ERROR);
        assert_ne!(EXIT_MANIFEST_ERROR, EXIT_STATE_ERROR);
        assert_ne!(EXIT_STATE_ERROR, EXIT_RESIDUAL);
    }

    #[test]
    fn json_pretty_serializes() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
    }

    #[test]
    fn colorize_keeps_text() {
        for s in ["done", "pending", "failed", "skipped", "other"] {
            assert!(colorize_step_status(s).contains(s));
        }
    }

    #[test]
    fn expand_tilde_uses_home() {
        let home = std::env::var("HOME").unwrap();
        assert_eq!(
            expand_tilde("~/.local/state/rigup"),
            PathBuf::from(home).join(".local/state/rigup")
        );
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn build_steps_rejects_bad_verify_kind() {
        let config: Config = toml::from_str(
            r#"
[[provision.step]]
key = "verify.x"
label = "x"
command = "true"
verify = "nonsense"
"#,
        )
        .unwrap();
        let err = build_steps(&config.provision.steps, Path::new("."), 2).unwrap_err();
        assert!(err.contains("unknown verify kind"));
    }

    #[test]
    fn build_steps_rejects_bad_key() {
        let config: Config = toml::from_str(
            r#"
[[provision.step]]
key = "has spaces"
label = "x"
command = "true"
"#,
        )
        .unwrap();
        let err = build_steps(&config.provision.steps, Path::new("."), 2).unwrap_err();
        assert!(err.starts_with("manifest error:"));
    }

    #[test]
    fn spinner_helpers_run() {
        let pb = spinner("working...");
        spin_ok(&pb, "done");
        let pb = spinner("working...");
        spin_fail(&pb, "failed");
    }
}
