//! Mock process runner for tests that exercise git/docker argv building
//! without touching a real runtime.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

#[derive(Clone, Default)]
pub struct MockProcessRunner {
    responses: Arc<Mutex<Vec<(String, ProcessOutput)>>>,
    history: Arc<Mutex<Vec<ProcessCommand>>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned successful response for the next call to `program`.
    pub fn expect_success(&self, program: &str, stdout: &str) {
        self.responses.lock().unwrap().push((
            program.to_string(),
            ProcessOutput {
                status: ExitStatus::Success,
                stdout: stdout.to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            },
        ));
    }

    pub fn expect_failure(&self, program: &str, code: i32, stderr: &str) {
        self.responses.lock().unwrap().push((
            program.to_string(),
            ProcessOutput {
                status: ExitStatus::Error(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
                duration: Duration::from_millis(1),
            },
        ));
    }

    pub fn history(&self) -> Vec<ProcessCommand> {
        self.history.lock().unwrap().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.history()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.history.lock().unwrap().push(command.clone());

        let mut responses = self.responses.lock().unwrap();
        if let Some(pos) = responses.iter().position(|(p, _)| p == &command.program) {
            let (_, output) = responses.remove(pos);
            return Ok(output);
        }
        drop(responses);

        Ok(ProcessOutput {
            status: ExitStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        })
    }
}
