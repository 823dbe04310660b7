//! Invocation of the external warehouse transformation tool.
//!
//! Commands are built as typed argument lists and executed without a shell.
//! A non-zero exit is an error carrying the captured output.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::error::{IngestError, Result};
use crate::validation::InputValidator;

/// Transformation subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformAction {
    /// Install package dependencies
    Deps,
    /// Build every model
    Run,
    /// Run data tests
    Test,
    /// Build only the selected models
    Select(String),
}

/// One invocation of the transformation tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformCommand {
    program: String,
    action: TransformAction,
    project_dir: Option<PathBuf>,
    profiles_dir: Option<PathBuf>,
}

impl TransformCommand {
    /// A bare invocation; the directories are added with the builders below
    pub fn new(program: impl Into<String>, action: TransformAction) -> Self {
        Self {
            program: program.into(),
            action,
            project_dir: None,
            profiles_dir: None,
        }
    }

    /// Pass `--project-dir`
    #[must_use]
    pub fn project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Pass `--profiles-dir`
    #[must_use]
    pub fn profiles_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.profiles_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Executable that will be spawned
    pub fn program_name(&self) -> &str {
        &self.program
    }

    /// Subcommand this invocation runs
    pub fn action(&self) -> &TransformAction {
        &self.action
    }

    /// Arguments passed to the program, in order
    pub fn args(&self) -> Vec<String> {
        let mut args = match &self.action {
            TransformAction::Deps => vec!["deps".to_string()],
            TransformAction::Run => vec!["run".to_string()],
            TransformAction::Test => vec!["test".to_string()],
            TransformAction::Select(target) => vec!["run".to_string(), "--select".to_string(), target.clone()],
        };

        if let Some(dir) = &self.project_dir {
            args.push("--project-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        if let Some(dir) = &self.profiles_dir {
            args.push("--profiles-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        args
    }
}

impl fmt::Display for TransformCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Builds and executes transformation commands for one project
#[derive(Debug, Clone)]
pub struct TransformRunner {
    program: String,
    project_dir: PathBuf,
    profiles_dir: PathBuf,
}

impl TransformRunner {
    /// Runner for `program` against one project
    pub fn new(program: impl Into<String>, project_dir: impl Into<PathBuf>, profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            project_dir: project_dir.into(),
            profiles_dir: profiles_dir.into(),
        }
    }

    /// Runner built from the `transform` config section
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.transform.program.clone(),
            &config.transform.project_dir,
            config.transform_profiles_dir(),
        )
    }

    /// A command for `action` bound to this runner's program and project
    pub fn command(&self, action: TransformAction) -> TransformCommand {
        TransformCommand::new(self.program.clone(), action)
            .project_dir(&self.project_dir)
            .profiles_dir(&self.profiles_dir)
    }

    /// Run `run --select <target>` after validating the selector
    pub async fn run_select(&self, target: &str) -> Result<CommandOutput> {
        InputValidator::validate_transform_target(target).map_err(|e| IngestError::Validation(e.to_string()))?;
        self.execute(&self.command(TransformAction::Select(target.to_string())))
            .await
    }

    /// Execute a command, failing on a non-zero exit
    pub async fn execute(&self, command: &TransformCommand) -> Result<CommandOutput> {
        info!(command = %command, "Running transform");

        let output = Command::new(command.program_name())
            .args(command.args())
            .kill_on_drop(true)
            .output()
            .await?;

        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(status = result.status, stdout = %result.stdout.trim(), "Transform output");

        if !output.status.success() {
            error!(command = %command, status = result.status, stderr = %result.stderr.trim(), "Transform failed");
            return Err(IngestError::Transform {
                command: command.to_string(),
                status: result.status,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }
}
