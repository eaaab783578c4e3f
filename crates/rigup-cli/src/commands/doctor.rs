use super::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::config::Config;
use rigup_state::{Layout, StateStore};
use std::path::Path;
use std::process::Command;

pub fn run(config: &Config, state_dir: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_tool(&mut checks, "terraform", &config.terraform.program, false);
    if check_tool(&mut checks, "git", "git", true) {
        all_pass = false;
    }
    check_tool(&mut checks, "npm", "npm", false);

    let layout = Layout::new(state_dir);
    if state_dir.exists() {
        checks.push(Check::pass("state_dir", "State directory exists"));
        check_state(&layout, config, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "state_dir",
            "State directory not initialized (created on first run)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

/// Returns true when the tool is missing, so required tools can flip the
/// aggregate result.
fn check_tool(checks: &mut Vec<Check>, name: &str, program: &str, required: bool) -> bool {
    let found = Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if found {
        checks.push(Check::pass(name, &format!("{program} is available")));
        false
    } else if required {
        checks.push(Check::fail(name, &format!("{program} not found on PATH")));
        true
    } else {
        checks.push(Check::warn(
            name,
            &format!("{program} not found on PATH (related steps will be skipped or fail)"),
        ));
        false
    }
}

fn check_state(layout: &Layout, config: &Config, checks: &mut Vec<Check>, all_pass: &mut bool) {
    for pipeline in ["provision", "teardown"] {
        let store = StateStore::new(layout, pipeline);
        match store.load() {
            Ok(state) => {
                checks.push(Check::pass(
                    &format!("{pipeline}_state"),
                    &format!(
                        "{pipeline} state loads ({} checkpoint(s))",
                        state.completed().len()
                    ),
                ));
                if let Some(failure) = state.last_failure() {
                    checks.push(Check::warn(
                        &format!("{pipeline}_failure"),
                        &format!("{pipeline} recorded a previous failure: {failure}"),
                    ));
                }
            }
            Err(e) => {
                *all_pass = false;
                checks.push(Check::fail(
                    &format!("{pipeline}_state"),
                    &format!("{pipeline} state unreadable: {e}"),
                ));
            }
        }
    }

    match rigup_state::RunLock::acquire(&layout.lock_file()) {
        Ok(lock) => {
            drop(lock);
            checks.push(Check::pass("run_lock", "Run lock is free"));
        }
        Err(e) => checks.push(Check::warn("run_lock", &format!("Run lock: {e}"))),
    }

    if layout.summary_file().exists() {
        checks.push(Check::info(
            "destroy_summary",
            "Destroy summary present from a previous teardown",
        ));
    }
    if layout.handoff_script().exists() {
        checks.push(Check::warn(
            "handoff_script",
            &format!(
                "Privileged cleanup script still pending: {}",
                layout.handoff_script().display()
            ),
        ));
    }

    if config.handoff.enabled && config.handoff.trigger.is_empty() {
        checks.push(Check::info(
            "handoff_trigger",
            "Handoff enabled without a trigger command; scripts must be run manually",
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Rigup Doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "pass".to_owned(),
            message: message.to_owned(),
        }
    }

    fn fail(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "fail".to_owned(),
            message: message.to_owned(),
        }
    }

    fn warn(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "warn".to_owned(),
            message: message.to_owned(),
        }
    }

    fn info(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "info".to_owned(),
            message: message.to_owned(),
        }
    }
}
