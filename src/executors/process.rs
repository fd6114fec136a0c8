// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Process executor
//!
//! Runs tool commands as child processes. Commands without arguments are
//! treated as shell scripts and run through `sh -c`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{resolve_artifacts, ToolExecutor, ToolInvocation, ToolOutput};
use crate::errors::{PipeforgeError, PipeforgeResult};

/// Process executor
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
}

impl ProcessExecutor {
    /// Create a new process executor using `sh` for scripts
    pub fn new() -> Self {
        Self { shell: "sh".into() }
    }

    /// Use a different shell for scripts
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    fn command(&self, invocation: &ToolInvocation) -> (Command, String) {
        if invocation.args.is_empty() {
            let mut cmd = Command::new(&self.shell);
            cmd.arg("-c").arg(&invocation.command);
            (cmd, self.shell.clone())
        } else {
            let mut cmd = Command::new(&invocation.command);
            cmd.args(&invocation.args);
            (cmd, invocation.command.clone())
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    async fn invoke(
        &self,
        invocation: &ToolInvocation,
        cancel: CancellationToken,
    ) -> PipeforgeResult<ToolOutput> {
        let (mut cmd, program) = self.command(invocation);
        if !invocation.working_dir.is_dir() {
            return Err(PipeforgeError::ToolExecutionFailed {
                tool: program,
                error: format!(
                    "working directory '{}' does not exist",
                    invocation.working_dir.display()
                ),
                help: None,
            });
        }

        cmd.current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipeforgeError::tool_not_found(&program),
            _ => PipeforgeError::ToolExecutionFailed {
                tool: program.clone(),
                error: e.to_string(),
                help: Some(format!("Check that '{}' is executable", program)),
            },
        })?;
        debug!(tool = %program, pid = ?child.id(), "spawned tool");

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                debug!(tool = %program, "tool cancelled");
                return Ok(ToolOutput {
                    duration: start.elapsed(),
                    cancelled: true,
                    ..Default::default()
                });
            }
        };

        let artifacts = resolve_artifacts(&invocation.artifacts, &invocation.working_dir)?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            artifacts,
            duration: start.elapsed(),
            cancelled: false,
        })
    }

    fn check_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
