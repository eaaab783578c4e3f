use super::{
    build_steps, json_pretty, project_dir, spin_fail, spin_ok, spinner, step_status_str,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::config::Config;
use rigup_engine::{shutdown_requested, Executor, StepStatus};
use rigup_state::{Layout, RunLock, StateStore};
use std::path::Path;

pub fn run(config: &Config, state_dir: &Path, reset: bool, json: bool) -> Result<u8, String> {
    let layout = Layout::new(state_dir);
    layout.initialize().map_err(|e| format!("state error: {e}"))?;
    let _lock = RunLock::acquire(&layout.lock_file()).map_err(|e| format!("state lock: {e}"))?;

    let executor = Executor::new(StateStore::new(&layout, "provision"));
    if reset {
        executor.reset().map_err(|e| format!("state error: {e}"))?;
    }

    let root = project_dir(config);
    let steps = build_steps(&config.provision.steps, &root, config.verify.max_retries)?;
    tracing::debug!("provision: {} step(s) against {}", steps.len(), root.display());
    if steps.is_empty() {
        return Err("manifest error: no [[provision.step]] entries defined".to_owned());
    }

    let pb = if json {
        None
    } else {
        Some(spinner("running provisioning pipeline..."))
    };
    let report = executor
        .run_with_cancel(&steps, shutdown_requested)
        .map_err(|e| format!("state error: {e}"))?;
    if let Some(pb) = pb {
        if report.success() {
            spin_ok(
                &pb,
                &format!(
                    "provision: {} executed, {} skipped",
                    report.executed_count(),
                    report.skipped_count()
                ),
            );
        } else {
            spin_fail(&pb, "provision failed");
        }
    }

    if json {
        let payload = serde_json::json!({
            "success": report.success(),
            "interrupted": report.interrupted,
            "previous_failure": report.previous_failure,
            "executed": report.executed_count(),
            "skipped": report.skipped_count(),
            "steps": report.steps.iter().map(|s| serde_json::json!({
                "key": s.key,
                "label": s.label,
                "status": step_status_str(s.status),
                "diagnostic": s.diagnostic,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if let Some(failure) = &report.previous_failure {
            println!("previous attempt failed: {failure}");
        }
        for step in &report.steps {
            match step.status {
                StepStatus::Executed => println!("  ✓ {}", step.label),
                StepStatus::Skipped => println!("  - {} (already done)", step.label),
                StepStatus::Failed => println!(
                    "  ✗ {}: {}",
                    step.label,
                    step.diagnostic.as_deref().unwrap_or("unknown failure")
                ),
            }
        }
        if report.interrupted {
            println!("interrupted: rerun to resume from the next incomplete step");
        }
    }

    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
