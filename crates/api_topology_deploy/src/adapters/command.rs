use std::path::PathBuf;
use std::process::Command;

use api_topology_core::pipeline::CommandSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait CommandRunner {
    /// `Err` only when the process could not be started.
    fn run(&self, command: &CommandSpec) -> Result<CommandOutcome, String>;
}

/// Runs commands as child processes that inherit stdio.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner {
    working_dir: Option<PathBuf>,
}

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(working_dir.into()),
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutcome, String> {
        let mut process = Command::new(&command.program);
        process.args(&command.args).envs(&command.env);
        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }

        tracing::info!(
            component = "command_runner",
            event = "command_started",
            command = %command,
        );
        let status = process
            .status()
            .map_err(|error| format!("failed to start `{command}`: {error}"))?;

        Ok(CommandOutcome {
            exit_code: status.code(),
        })
    }
}
