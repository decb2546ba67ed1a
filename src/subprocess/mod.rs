//! Unified subprocess abstraction for external tool integration.
//!
//! Mirrors the host crate's subprocess layer: a trait-based [`ProcessRunner`]
//! with a production Tokio implementation and a mock for tests, plus
//! tool-specific wrappers ([`git::GitRunner`], [`docker::DockerRunner`]) that
//! build argv vectors and never touch a shell.

pub mod builder;
pub mod docker;
pub mod error;
pub mod gh;
pub mod git;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use docker::DockerRunner;
pub use error::ProcessError;
pub use gh::GhRunner;
pub use git::GitRunner;
pub use mock::MockProcessRunner;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

/// Central manager handing out tool-specific runners backed by one
/// [`ProcessRunner`] implementation.
#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        (Self::new(Arc::new(mock.clone())), mock)
    }

    pub fn git(&self) -> GitRunner {
        GitRunner::new(self.runner.clone())
    }

    pub fn docker(&self) -> DockerRunner {
        DockerRunner::new(self.runner.clone())
    }

    pub fn gh(&self) -> GhRunner {
        GhRunner::new(self.runner.clone())
    }
}
