use super::{
    build_steps, json_pretty, project_dir, spin_fail, spin_ok, spinner, step_status_str,
    EXIT_FAILURE, EXIT_RESIDUAL, EXIT_SUCCESS,
};
use crate::config::Config;
use rigup_cleanup::{
    process_with, resolve, Category, CategorySpec, CleanupConfig, CleanupOptions, CleanupReport,
    FsRemover, TargetOutcome,
};
use rigup_engine::{shutdown_requested, Executor, RunReport};
use rigup_infra::{
    emit_summary, DestroyCoordinator, DestroyResult, DestroyStatus, HandoffOutcome,
    HandoffSignaler, TerraformCli,
};
use rigup_state::{Layout, RunLock, StateStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct TeardownArgs {
    pub dry_run: bool,
    pub parallel: Option<usize>,
    pub skip_destroy: bool,
    pub backup_dir: Option<PathBuf>,
}

pub fn run(config: &Config, state_dir: &Path, args: &TeardownArgs, json: bool) -> Result<u8, String> {
    let layout = Layout::new(state_dir);
    layout.initialize().map_err(|e| format!("state error: {e}"))?;
    let _lock = RunLock::acquire(&layout.lock_file()).map_err(|e| format!("state lock: {e}"))?;

    let root = project_dir(config);

    // Phase 1: bookkeeping steps through the checkpointed executor. A
    // failed bookkeeping step aborts the whole teardown before anything
    // destructive happens. Dry runs skip this phase; the steps mutate.
    let report = if args.dry_run || config.teardown.steps.is_empty() {
        RunReport::default()
    } else {
        let executor = Executor::new(StateStore::new(&layout, "teardown"));
        let steps = build_steps(&config.teardown.steps, &root, config.verify.max_retries)?;
        let report = executor
            .run_with_cancel(&steps, shutdown_requested)
            .map_err(|e| format!("state error: {e}"))?;
        if !report.success() {
            print_step_report(&report, json)?;
            return Ok(EXIT_FAILURE);
        }
        report
    };

    // Phase 2: terraform destroy per environment directory, in configured
    // order, then the summary file.
    let destroy_results = if args.skip_destroy || config.terraform.env_dirs.is_empty() {
        Vec::new()
    } else {
        let runner = TerraformCli::new(&config.terraform.program);
        let env_dirs: Vec<PathBuf> = config
            .terraform
            .env_dirs
            .iter()
            .map(|d| root.join(d))
            .collect();
        let pb = if json {
            None
        } else {
            Some(spinner("destroying terraform environments..."))
        };
        let results = DestroyCoordinator::new(&runner, args.dry_run).destroy_all(&env_dirs);
        if let Some(pb) = pb {
            if results.iter().any(|r| r.status == DestroyStatus::Failure) {
                spin_fail(&pb, "terraform destroy had failures");
            } else {
                spin_ok(&pb, &format!("{} environment(s) processed", results.len()));
            }
        }
        results
    };
    if !args.dry_run {
        emit_summary(&layout.summary_file(), &destroy_results)
            .map_err(|e| format!("failed to write destroy summary: {e}"))?;
    }

    // Phase 3: destructive cleanup with per-category backups.
    let targets = resolve(&CleanupConfig {
        root: root.clone(),
        home: std::env::var_os("HOME").map(PathBuf::from),
        categories: category_specs(config)?,
    })
    .map_err(|e| e.to_string())?;

    let opts = CleanupOptions {
        dry_run: args.dry_run,
        parallelism: args.parallel.unwrap_or(config.cleanup.parallelism),
        backup_dir: Some(resolve_backup_dir(config, &layout, args)),
        delete_attempts: config.cleanup.delete_attempts,
        blocking_processes: config.cleanup.blocking_processes.clone(),
        ..CleanupOptions::default()
    };
    let cleanup = process_with(&targets, &opts, &FsRemover, shutdown_requested);

    // Phase 4: hand residuals that need elevation to the privileged
    // runner, if one is configured.
    let residual_paths: Vec<PathBuf> = cleanup
        .residuals()
        .iter()
        .map(|t| t.path.clone())
        .collect();
    let handoff = if config.handoff.enabled && !args.dry_run && !residual_paths.is_empty() {
        let signaler = HandoffSignaler::new(layout.handoff_script())
            .trigger(config.handoff.trigger.clone())
            .timeout(Duration::from_secs(config.handoff.timeout_secs))
            .poll_interval(Duration::from_millis(config.handoff.poll_interval_ms));
        let outcome = signaler
            .dispatch(&privileged_script(&residual_paths))
            .map_err(|e| format!("handoff failed: {e}"))?;
        Some(outcome)
    } else {
        None
    };

    print_teardown_report(
        args,
        &report,
        &destroy_results,
        &cleanup,
        handoff.as_ref(),
        json,
    )?;

    let destroy_failed = destroy_results
        .iter()
        .any(|r| r.status == DestroyStatus::Failure);
    let unresolved_residuals = match &handoff {
        Some(HandoffOutcome::Completed) => false,
        Some(HandoffOutcome::ManualActionRequired { .. }) => true,
        None => !cleanup.success(),
    };
    Ok(if destroy_failed {
        EXIT_FAILURE
    } else if unresolved_residuals {
        EXIT_RESIDUAL
    } else {
        EXIT_SUCCESS
    })
}

fn category_specs(config: &Config) -> Result<Vec<CategorySpec>, String> {
    config
        .cleanup
        .categories
        .iter()
        .map(|section| {
            let category = Category::parse(&section.name)
                .map_err(|e| format!("manifest error: {e}"))?;
            Ok(CategorySpec {
                category,
                paths: section.paths.clone(),
                globs: section.globs.clone(),
            })
        })
        .collect()
}

fn resolve_backup_dir(config: &Config, layout: &Layout, args: &TeardownArgs) -> PathBuf {
    if let Some(dir) = &args.backup_dir {
        return dir.clone();
    }
    if let Some(dir) = &config.cleanup.backup_dir {
        return super::expand_tilde(dir);
    }
    layout.archive_dir()
}

/// The marker script removes itself last so its disappearance means every
/// line before it ran.
fn privileged_script(residuals: &[PathBuf]) -> String {
    let mut script = String::from(
        "#!/bin/sh\n# Paths the unprivileged teardown could not remove.\nset -e\n",
    );
    for path in residuals {
        script.push_str(&format!("rm -rf -- '{}'\n", path.display()));
    }
    script.push_str("rm -f -- \"$0\"\n");
    script
}

fn print_step_report(report: &RunReport, json: bool) -> Result<(), String> {
    if json {
        let payload = serde_json::json!({
            "success": report.success(),
            "steps": report.steps.iter().map(|s| serde_json::json!({
                "key": s.key,
                "label": s.label,
                "status": step_status_str(s.status),
                "diagnostic": s.diagnostic,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(failed) = report.failed() {
        println!(
            "teardown aborted: {} failed: {}",
            failed.label,
            failed.diagnostic.as_deref().unwrap_or("unknown failure")
        );
    } else if report.interrupted {
        println!("teardown interrupted before destructive phases; rerun to resume");
    }
    Ok(())
}

fn outcome_str(outcome: &TargetOutcome) -> String {
    outcome.to_string()
}

#[allow(clippy::too_many_lines)]
fn print_teardown_report(
    args: &TeardownArgs,
    steps: &RunReport,
    destroy: &[DestroyResult],
    cleanup: &CleanupReport,
    handoff: Option<&HandoffOutcome>,
    json: bool,
) -> Result<(), String> {
    if json {
        let payload = serde_json::json!({
            "dry_run": args.dry_run,
            "steps": steps.steps.iter().map(|s| serde_json::json!({
                "key": s.key,
                "label": s.label,
                "status": step_status_str(s.status),
            })).collect::<Vec<_>>(),
            "destroy": destroy,
            "cleanup": {
                "targets": cleanup.targets.iter().map(|t| serde_json::json!({
                    "category": t.category.to_string(),
                    "path": t.path.display().to_string(),
                    "outcome": outcome_str(&t.outcome),
                })).collect::<Vec<_>>(),
                "backups": cleanup.backups.iter()
                    .map(|b| b.archive_path.display().to_string())
                    .collect::<Vec<_>>(),
                "warnings": cleanup.warnings,
                "removed": cleanup.removed_count(),
            },
            "residuals": cleanup.residuals().iter()
                .map(|t| t.path.display().to_string())
                .collect::<Vec<_>>(),
            "handoff": handoff.map(|h| match h {
                HandoffOutcome::Completed => "completed".to_owned(),
                HandoffOutcome::ManualActionRequired { script } =>
                    format!("manual action required: {}", script.display()),
            }),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(());
    }

    if !destroy.is_empty() {
        println!("terraform:");
        for result in destroy {
            println!(
                "  {} {} ({}): {}",
                result.status, result.environment, result.backend, result.message
            );
        }
    }

    let verb = if args.dry_run { "would remove" } else { "removed" };
    let affected = cleanup
        .targets
        .iter()
        .filter(|t| {
            matches!(
                t.outcome,
                TargetOutcome::Removed | TargetOutcome::WouldRemove
            )
        })
        .count();
    println!("cleanup: {verb} {affected} of {} target(s)", cleanup.targets.len());
    for backup in &cleanup.backups {
        println!("  backup: {}", backup.archive_path.display());
    }
    for warning in &cleanup.warnings {
        println!("  warning: {warning}");
    }

    let residuals = cleanup.residuals();
    if !residuals.is_empty() {
        println!("residual paths requiring manual attention:");
        for target in residuals {
            println!("  {} ({})", target.path.display(), outcome_str(&target.outcome));
        }
    }

    match handoff {
        Some(HandoffOutcome::Completed) => {
            println!("privileged cleanup completed");
        }
        Some(HandoffOutcome::ManualActionRequired { script }) => {
            println!(
                "privileged cleanup did not complete; run manually: {}",
                script.display()
            );
        }
        None => {}
    }
    Ok(())
}
