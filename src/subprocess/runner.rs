use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command as TokioCommand;

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Production runner: spawns real OS processes, no shell interpolation.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();

        tracing::debug!(
            program = %command.program,
            args = ?command.args,
            "executing subprocess"
        );

        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args);
        cmd.envs(&command.env);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let run = async {
            let child = cmd
                .spawn()
                .map_err(|e| ProcessError::SpawnFailed {
                    command: command.program.clone(),
                    source: e,
                })?;
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| ProcessError::Io(e))?;
            Ok::<_, ProcessError>(output)
        };

        let output = match command.timeout {
            Some(t) => tokio::time::timeout(t, run)
                .await
                .map_err(|_| ProcessError::Timeout(t))??,
            None => run.await?,
        };

        let status = if let Some(code) = output.status.code() {
            if code == 0 {
                ExitStatus::Success
            } else {
                ExitStatus::Error(code)
            }
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                ExitStatus::Signal(output.status.signal().unwrap_or(-1))
            }
            #[cfg(not(unix))]
            {
                ExitStatus::Error(-1)
            }
        };

        Ok(ProcessOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}
