use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::ProcessError;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a named external executable to completion, optionally bounded by a
/// wall-clock deadline. A deadline overrun terminates the child; the caller
/// must treat it as a hard failure, never a partial success.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        deadline: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError>;
}

pub struct ExecRunner;

#[async_trait]
impl ProcessRunner for ExecRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        deadline: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let name = program.display().to_string();

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        // An expired deadline drops the wait future, which must take the
        // child down with it.
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound(name.clone())
            } else {
                ProcessError::LaunchFailed {
                    program: name.clone(),
                    source,
                }
            }
        })?;

        let output = match deadline {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ProcessError::Timeout {
                        program: name,
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ProcessError::LaunchFailed {
            program: name.clone(),
            source,
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                program: name,
                code: exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

/// Render a command line for logging with every secret argument masked.
pub fn redacted_command_line(program: &Path, args: &[String], secrets: &[&str]) -> String {
    let mut parts = vec![program.display().to_string()];
    for arg in args {
        if secrets.iter().any(|secret| !secret.is_empty() && arg == secret) {
            parts.push("***".to_string());
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}
