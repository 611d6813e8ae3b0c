//! External command execution.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// A command line to run, with its working directory and extra environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Added on top of the inherited process environment.
    pub envs: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, envs: BTreeMap<String, String>) -> Self {
        self.envs.extend(envs);
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line, shell quoted.
    pub fn printable(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words.clone()).unwrap_or_else(|_| words.collect::<Vec<_>>().join(" "))
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command failed with exit status {code} ({command}): check the command's output for details")]
    Exit { code: i32, command: String },

    #[error("executing command failed ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Runs commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs with stdout and stderr inherited from this process.
    async fn run(&self, cmd: &CommandSpec) -> Result<(), CommandError>;

    /// Runs and returns stdout followed by stderr.
    async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError>;
}

/// Executes commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn command(cmd: &CommandSpec) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).envs(&cmd.envs);
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command
    }

    async fn feed_stdin(
        child: &mut tokio::process::Child,
        cmd: &CommandSpec,
    ) -> Result<(), CommandError> {
        let (Some(input), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) else {
            return Ok(());
        };
        // Dropping stdin on return closes the pipe.
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|source| spawn_error(cmd, source))
    }
}

fn spawn_error(cmd: &CommandSpec, source: io::Error) -> CommandError {
    CommandError::Spawn {
        command: cmd.printable(),
        source,
    }
}

fn check_status(cmd: &CommandSpec, status: std::process::ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    Err(CommandError::Exit {
        // Killed by a signal.
        code: status.code().unwrap_or(-1),
        command: cmd.printable(),
    })
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, cmd: &CommandSpec) -> Result<(), CommandError> {
        trace!("spawn: {:?} {:?} in {:?}", cmd.program, cmd.args, cmd.dir);
        let mut child = Self::command(cmd)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| spawn_error(cmd, source))?;

        Self::feed_stdin(&mut child, cmd).await?;
        let status = child.wait().await.map_err(|source| spawn_error(cmd, source))?;
        check_status(cmd, status)
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError> {
        trace!("spawn: {:?} {:?} in {:?}", cmd.program, cmd.args, cmd.dir);
        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(cmd, source))?;

        Self::feed_stdin(&mut child, cmd).await?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| spawn_error(cmd, source))?;
        check_status(cmd, output.status)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }
}
