use crate::action::{Action, ActionOutput, CommandAction};
use crate::EngineError;
use std::path::Path;
use tracing::{info, warn};

/// Category of a verification step. Selects the remediation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyKind {
    Lint,
    TypeCheck,
    UnitTests,
    EndToEnd,
    Generic,
}

/// One remediation rung: what to try before the next verification retry.
pub struct Rung {
    pub label: String,
    pub action: Box<dyn Action>,
}

/// Escalation ladder of remediations, indexed by attempt number.
///
/// Encodes operator knowledge ("if lint fails, try autofix before giving
/// up") as data rather than ad hoc branching. New categories are additive.
pub struct RecoveryPolicy {
    rungs: Vec<Rung>,
}

impl RecoveryPolicy {
    pub fn new(rungs: Vec<Rung>) -> Self {
        Self { rungs }
    }

    /// No remediations: every retry re-runs the command unaided.
    pub fn none() -> Self {
        Self { rungs: Vec::new() }
    }

    pub fn rung(&self, attempt: usize) -> Option<&Rung> {
        self.rungs.get(attempt)
    }

    /// The stock ladder for a JS/TS toolchain workspace.
    ///
    /// Attempt 0 reinstalls dependencies from the lockfile; attempt 1 is
    /// category-specific (lint autofix, browser-automation reinstall for
    /// end-to-end suites, build-cache clear otherwise); attempt 2 purges
    /// the dependency cache and forces a clean reinstall.
    pub fn standard(kind: VerifyKind, workdir: &Path) -> Self {
        let dir = workdir.to_path_buf();
        let rung1: Rung = match kind {
            VerifyKind::Lint => Rung {
                label: "apply lint autofixes".to_owned(),
                action: Box::new(
                    CommandAction::new("npm")
                        .args(["run", "lint", "--", "--fix"])
                        .current_dir(&dir),
                ),
            },
            VerifyKind::EndToEnd => Rung {
                label: "reinstall browser automation dependencies".to_owned(),
                action: Box::new(
                    CommandAction::new("npx")
                        .args(["playwright", "install", "--with-deps"])
                        .current_dir(&dir),
                ),
            },
            VerifyKind::TypeCheck | VerifyKind::UnitTests | VerifyKind::Generic => Rung {
                label: "clear build cache".to_owned(),
                action: Box::new(
                    CommandAction::shell("rm -rf node_modules/.cache dist build")
                        .current_dir(&dir),
                ),
            },
        };
        Self::new(vec![
            Rung {
                label: "reinstall dependencies from lockfile".to_owned(),
                action: Box::new(CommandAction::new("npm").arg("ci").current_dir(&dir)),
            },
            rung1,
            Rung {
                label: "purge dependency cache and reinstall".to_owned(),
                action: Box::new(
                    CommandAction::shell(
                        "npm cache clean --force && rm -rf node_modules && npm ci",
                    )
                    .current_dir(&dir),
                ),
            },
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Command succeeded, possibly after remediated retries.
    Passed { attempts: u32 },
    /// Retry ceiling reached; the last command diagnostic is attached.
    Exhausted { attempts: u32, diagnostic: String },
    /// A remediation itself failed; aborted without consuming a retry.
    RemediationFailed { rung: String, diagnostic: String },
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, VerifyOutcome::Passed { .. })
    }
}

/// Run a verification command with remediated retries.
///
/// The command runs at most `max_retries + 1` times. Between attempts the
/// ladder rung for the current attempt number runs first; a failing rung
/// aborts immediately. Attempts past the end of the ladder retry unaided.
pub fn verify(
    label: &str,
    command: &dyn Action,
    max_retries: u32,
    policy: &RecoveryPolicy,
) -> Result<VerifyOutcome, EngineError> {
    let mut attempt: u32 = 0;
    loop {
        info!("{label}: verification attempt {}", attempt + 1);
        let out = command.run()?;
        if out.success {
            return Ok(VerifyOutcome::Passed { attempts: attempt });
        }
        let diagnostic = out.diagnostic();
        if attempt >= max_retries {
            warn!("{label}: verification failed after {} attempts", attempt + 1);
            return Ok(VerifyOutcome::Exhausted {
                attempts: attempt + 1,
                diagnostic,
            });
        }

        if let Some(rung) = policy.rung(attempt as usize) {
            info!("{label}: remediation: {}", rung.label);
            let remedy = rung.action.run()?;
            if !remedy.success {
                warn!("{label}: remediation '{}' failed", rung.label);
                return Ok(VerifyOutcome::RemediationFailed {
                    rung: rung.label.clone(),
                    diagnostic: remedy.diagnostic(),
                });
            }
        }
        attempt += 1;
    }
}

/// Adapter so verification steps plug into the executor as ordinary steps.
pub struct VerifiedAction {
    label: String,
    command: Box<dyn Action>,
    policy: RecoveryPolicy,
    max_retries: u32,
}

impl VerifiedAction {
    pub fn new(
        label: impl Into<String>,
        command: Box<dyn Action>,
        policy: RecoveryPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            label: label.into(),
            command,
            policy,
            max_retries,
        }
    }
}

impl Action for VerifiedAction {
    fn run(&self) -> Result<ActionOutput, EngineError> {
        match verify(&self.label, self.command.as_ref(), self.max_retries, &self.policy)? {
            VerifyOutcome::Passed { .. } => Ok(ActionOutput::ok()),
            VerifyOutcome::Exhausted {
                attempts,
                diagnostic,
            } => Ok(ActionOutput::failed(format!(
                "verification failed after {attempts} attempts: {diagnostic}"
            ))),
            VerifyOutcome::RemediationFailed { rung, diagnostic } => Ok(ActionOutput::failed(
                format!("remediation '{rung}' failed: {diagnostic}"),
            )),
        }
    }
}
