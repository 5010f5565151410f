//! External device tools (`smartctl`, `nvidia-smi`) behind a trait so their
//! collectors can be tested with scripted output.

use std::process::Command;

use crate::collector::CollectError;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program to completion.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`.
    ///
    /// A program that ran but exited non-zero is not an error here; the
    /// caller decides from `success` and the captured output.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CollectError>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CollectError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| CollectError::command(program, e.to_string()))?;

        Ok(CommandOutput {
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
    fn test_missing_program_is_command_error() {
        let err = RealCommandRunner
            .run("/nonexistent/pulse-test-binary", &["--version"])
            .unwrap_err();
        assert!(matches!(err, CollectError::Command { ref program, .. } if program == "/nonexistent/pulse-test-binary"));
    }

    #[test]
    fn test_exit_status_is_captured() {
        let ok = RealCommandRunner.run("sh", &["-c", "echo hi"]).unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout, "hi\n");

        let failed = RealCommandRunner.run("sh", &["-c", "echo oops >&2; exit 3"]).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.stderr, "oops\n");
    }
}
