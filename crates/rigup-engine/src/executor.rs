use crate::step::Step;
use crate::EngineError;
use rigup_state::StateStore;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Executed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub key: String,
    pub label: String,
    pub status: StepStatus,
    pub diagnostic: Option<String>,
}

/// What a pipeline run did, step by step.
#[derive(Debug, Default)]
pub struct RunReport {
    pub steps: Vec<StepResult>,
    /// Diagnostic persisted by the previous aborted run, if any.
    pub previous_failure: Option<String>,
    /// True when a shutdown request stopped the run between steps.
    pub interrupted: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        !self.interrupted && self.failed().is_none()
    }

    pub fn failed(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn executed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Executed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count()
    }
}

/// Drives an ordered step list against the checkpoint store.
///
/// Completed steps are skipped, each success is persisted before the next
/// step starts, and the first failure aborts the run (fail-fast, no partial
/// credit). Rerunning with the same list resumes from the first incomplete
/// step.
pub struct Executor {
    store: StateStore,
}

impl Executor {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn run(&self, steps: &[Step]) -> Result<RunReport, EngineError> {
        self.run_with_cancel(steps, || false)
    }

    pub fn run_with_cancel(
        &self,
        steps: &[Step],
        should_stop: impl Fn() -> bool,
    ) -> Result<RunReport, EngineError> {
        let mut state = self.store.load()?;
        let mut report = RunReport::default();

        if let Some(failure) = state.last_failure() {
            warn!("previous attempt failed: {failure}");
            report.previous_failure = Some(failure.to_owned());
            // Announce once, then clear so the message does not outlive
            // the run that resumes past it.
            state.clear_last_failure();
            self.store.save(&state)?;
        }

        for step in steps {
            if should_stop() {
                info!("shutdown requested, stopping before '{}'", step.label);
                report.interrupted = true;
                break;
            }

            if state.is_done(&step.key) {
                info!("{}: skipped (already completed)", step.label);
                report.steps.push(StepResult {
                    key: step.key.clone(),
                    label: step.label.clone(),
                    status: StepStatus::Skipped,
                    diagnostic: None,
                });
                continue;
            }

            info!("{}: running", step.label);
            let outcome = step.action.run();
            let diagnostic = match outcome {
                Ok(out) if out.success => None,
                Ok(out) => Some(out.diagnostic()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(diag) = diagnostic {
                error!("{}: failed: {diag}", step.label);
                state.set_last_failure(format!(
                    "{} {}: {diag}",
                    chrono::Utc::now().to_rfc3339(),
                    step.label
                ));
                self.store.save(&state)?;
                report.steps.push(StepResult {
                    key: step.key.clone(),
                    label: step.label.clone(),
                    status: StepStatus::Failed,
                    diagnostic: Some(diag),
                });
                return Ok(report);
            }

            state.mark_done(&step.key);
            self.store.save(&state)?;
            info!("{}: done", step.label);
            report.steps.push(StepResult {
                key: step.key.clone(),
                label: step.label.clone(),
                status: StepStatus::Executed,
                diagnostic: None,
            });
        }

        Ok(report)
    }

    /// Clear all checkpoints, forcing the next run to re-execute everything.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.store.reset()?;
        Ok(())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
}
