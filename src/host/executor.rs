//! Privileged command execution
//!
//! Runs host tools through `tokio::process`, optionally behind sudo, and
//! returns combined output. All storage-stack mutation flows through here.

use crate::config::ExecutorConfig;
use crate::domain::ports::{command_line, CommandExecutor, CommandOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Executor that runs real host programs
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    config: ExecutorConfig,
}

impl SystemExecutor {
    /// Create a new executor
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn build(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.config.use_sudo {
            let mut cmd = Command::new(&self.config.sudo_program);
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        let line = command_line(program, args);
        debug!("exec: {}", line);

        let mut cmd = self.build(program, args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolUnavailable {
                    tool: if self.config.use_sudo {
                        self.config.sudo_program.clone()
                    } else {
                        program.to_string()
                    },
                }
            } else {
                Error::CommandSpawn {
                    command: line.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await.map_err(|e| Error::CommandSpawn {
            command: line.clone(),
            reason: e.to_string(),
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        // sudo reports a missing program as exit 1 with "command not found"
        if self.config.use_sudo
            && output.status.code() == Some(1)
            && combined.contains("command not found")
        {
            return Err(Error::ToolUnavailable {
                tool: program.to_string(),
            });
        }

        debug!("exec: {} -> {:?}", line, output.status.code());
        Ok(CommandOutput {
            status: output.status.code(),
            output: combined,
        })
    }
}
