//! Check tool seam and the external-command implementation

use crate::config::ToolCommand;
use crate::error::ToolError;
use async_trait::async_trait;
use polyport_graph::FileId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Everything a tool may look at
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    /// Unit being checked
    pub file: &'a FileId,
    /// Candidate text
    pub candidate: &'a str,
    /// Where the candidate lives in the output tree
    pub output_path: &'a Path,
    /// Test files for the unit (absolute or relative to the working directory)
    pub tests: &'a [PathBuf],
    /// Translations of visible dependencies, by output path
    pub artifacts: &'a [(PathBuf, Arc<str>)],
}

/// Raw tool result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl ToolOutput {
    /// Exit 0 with no output
    #[must_use]
    pub fn clean() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Exit 1 with `stdout`
    #[must_use]
    pub fn findings(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(1),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Both streams, stdout first
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Last non-empty line of the combined output
    #[must_use]
    pub fn last_line(&self) -> Option<String> {
        self.combined()
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(ToString::to_string)
    }
}

/// How a tool run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Nothing to report
    Clean,
    /// Findings to interpret
    Findings(ToolOutput),
}

/// An external check (syntax checker, linter, test runner)
#[async_trait]
pub trait CheckTool: Send + Sync {
    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Exit codes meaning "ran fine, reported findings"
    fn finding_codes(&self) -> &[i32] {
        &[1]
    }

    /// Run against one candidate
    async fn run(&self, input: &CheckInput<'_>) -> Result<ToolOutput, ToolError>;

    /// Separate findings from crashes
    fn classify(&self, output: ToolOutput) -> Result<ToolOutcome, ToolError> {
        match output.exit_code {
            Some(0) => Ok(ToolOutcome::Clean),
            Some(code) if self.finding_codes().contains(&code) => Ok(ToolOutcome::Findings(output)),
            code => Err(ToolError::Crashed {
                tool: self.name().to_string(),
                detail: format!(
                    "exit {}: {}",
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    output.last_line().unwrap_or_default()
                ),
            }),
        }
    }
}

/// Runs a configured command in a scratch directory
///
/// The candidate and any dependency translations are written under a fresh
/// temporary directory at their output paths. The child is killed when the
/// future is dropped, so a stage timeout does not leak processes.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    command: ToolCommand,
}

impl CommandTool {
    /// Create from config
    #[must_use]
    pub fn new(name: impl Into<String>, command: ToolCommand) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    fn expand_args(&self, file: &Path, dir: &Path, tests: &[PathBuf]) -> Vec<String> {
        let mut args = Vec::with_capacity(self.command.args.len());
        for arg in &self.command.args {
            if arg == "{tests}" {
                args.extend(tests.iter().map(|t| t.display().to_string()));
            } else {
                args.push(
                    arg.replace("{file}", &file.display().to_string())
                        .replace("{dir}", &dir.display().to_string()),
                );
            }
        }
        args
    }
}

async fn write_file(root: &Path, relative: &Path, text: &str) -> Result<PathBuf, ToolError> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::Workspace(e.to_string()))?;
    }
    tokio::fs::write(&path, text)
        .await
        .map_err(|e| ToolError::Workspace(e.to_string()))?;
    Ok(path)
}

#[async_trait]
impl CheckTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn finding_codes(&self) -> &[i32] {
        &self.command.finding_codes
    }

    async fn run(&self, input: &CheckInput<'_>) -> Result<ToolOutput, ToolError> {
        let scratch = tempfile::tempdir().map_err(|e| ToolError::Workspace(e.to_string()))?;
        for (path, text) in input.artifacts {
            write_file(scratch.path(), path, text).await?;
        }
        let file = write_file(scratch.path(), input.output_path, input.candidate).await?;
        let args = self.expand_args(&file, scratch.path(), input.tests);
        debug!(tool = %self.name, file = %input.file, ?args, "Running check tool");

        let output = Command::new(&self.command.program)
            .args(&args)
            .current_dir(scratch.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Launch {
                program: self.command.program.clone(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
