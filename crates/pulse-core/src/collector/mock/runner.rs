//! Scripted command runner for testing device collectors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::collector::CollectError;
use crate::collector::command::{CommandOutput, CommandRunner};

/// Replays canned output keyed by the full command line
/// (`program arg1 arg2 ...`). Unscripted command lines fail as if the
/// program were missing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<ScriptedInner>>,
}

#[derive(Debug, Default)]
struct ScriptedInner {
    outputs: HashMap<String, CommandOutput>,
    calls: Vec<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a successful run printing `stdout`.
    pub fn on_success(&self, command_line: &str, stdout: impl Into<String>) {
        self.script(
            command_line,
            CommandOutput {
                success: true,
                stdout: stdout.into(),
                stderr: String::new(),
            },
        );
    }

    /// Scripts a non-zero exit printing `stderr`.
    pub fn on_failure(&self, command_line: &str, stderr: impl Into<String>) {
        self.script(
            command_line,
            CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: stderr.into(),
            },
        );
    }

    pub fn script(&self, command_line: &str, output: CommandOutput) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.outputs.insert(command_line.to_string(), output);
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.calls.clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CollectError> {
        let command_line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.calls.push(command_line.clone());
        inner
            .outputs
            .get(&command_line)
            .cloned()
            .ok_or_else(|| CollectError::command(program, "No such file or directory (os error 2)"))
    }
}
