use crate::EngineError;
use std::path::PathBuf;
use std::process::Command;

/// What an external collaborator reported back.
///
/// Only `success` drives control flow; the captured text is kept purely
/// for diagnostics and logging.
#[derive(Debug, Clone)]
pub struct ActionOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ActionOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// A short diagnostic for reports: the tail of stderr, falling back
    /// to stdout, falling back to a generic message.
    pub fn diagnostic(&self) -> String {
        let pick = |s: &str| -> Option<String> {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            let tail: Vec<&str> = trimmed.lines().rev().take(5).collect();
            Some(tail.into_iter().rev().collect::<Vec<_>>().join("; "))
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| "no output captured".to_owned())
    }
}

/// An opaque unit of work performed by an external collaborator.
pub trait Action {
    fn run(&self) -> Result<ActionOutput, EngineError>;
}

/// The standard action: invoke a command and capture its output.
#[derive(Debug, Clone)]
pub struct CommandAction {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandAction {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    /// Convenience for `sh -c "<script>"` collaborators.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Action for CommandAction {
    fn run(&self) -> Result<ActionOutput, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        let output = cmd.output()?;
        Ok(ActionOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_action_success() {
        let out = CommandAction::new("true").run().unwrap();
        assert!(out.success);
    }

    #[test]
    fn command_action_failure() {
        let out = CommandAction::new("false").run().unwrap();
        assert!(!out.success);
    }

    #[test]
    fn command_action_captures_stdout() {
        let out = CommandAction::shell("echo hello").run().unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn command_action_missing_program_is_launch_error() {
        let result = CommandAction::new("rigup-no-such-binary-xyz").run();
        assert!(result.is_err());
    }

    #[test]
    fn command_action_respects_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = CommandAction::shell("test \"$PWD\" = \"$EXPECTED\"")
            .current_dir(dir.path())
            .env("EXPECTED", dir.path().to_string_lossy())
            .run()
            .unwrap();
        assert!(out.success);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = ActionOutput {
            success: false,
            stdout: "from stdout".to_owned(),
            stderr: "from stderr".to_owned(),
        };
        assert_eq!(out.diagnostic(), "from stderr");
    }

    #[test]
    fn diagnostic_falls_back_to_stdout_then_generic() {
        let out = ActionOutput {
            success: false,
            stdout: "only stdout".to_owned(),
            stderr: String::new(),
        };
        assert_eq!(out.diagnostic(), "only stdout");

        let silent = ActionOutput::failed("");
        assert_eq!(silent.diagnostic(), "no output captured");
    }

    #[test]
    fn diagnostic_keeps_last_lines_only() {
        let mut stderr = String::new();
        for i in 0..20 {
            stderr.push_str(&format!("line {i}\n"));
        }
        let out = ActionOutput::failed(stderr);
        let diag = out.diagnostic();
        assert!(diag.contains("line 19"));
        assert!(!diag.contains("line 3;"));
    }
}
