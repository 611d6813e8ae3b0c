//! Test doubles.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandError, CommandExecutor, CommandSpec};

/// Records commands instead of running them.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<CommandSpec>>,
    fail_prefix: Option<String>,
    output: String,
}

impl RecordingExecutor {
    /// Fails with exit status 1 every command whose printable form starts
    /// with `prefix`.
    pub fn failing_on(prefix: &str) -> Self {
        Self {
            fail_prefix: Some(prefix.to_string()),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(CommandSpec::printable).collect()
    }

    fn record(&self, cmd: &CommandSpec) -> Result<(), CommandError> {
        self.commands.lock().unwrap().push(cmd.clone());
        if let Some(prefix) = &self.fail_prefix
            && cmd.printable().starts_with(prefix.as_str())
        {
            return Err(CommandError::Exit {
                code: 1,
                command: cmd.printable(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, cmd: &CommandSpec) -> Result<(), CommandError> {
        self.record(cmd)
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError> {
        self.record(cmd)?;
        Ok(self.output.clone())
    }
}
