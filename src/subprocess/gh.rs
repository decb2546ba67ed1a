//! Minimal `gh` (GitHub CLI) wrapper: the only external host collaborator
//! MergeOrchestrator calls, kept argv-only like `GitRunner`/`DockerRunner`.

use std::path::Path;
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::ProcessRunner;

#[derive(Clone)]
pub struct GhRunner {
    runner: Arc<dyn ProcessRunner>,
}

impl GhRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Creates a PR for the current branch against `base`, returning the PR
    /// URL `gh` prints to stdout.
    pub async fn create_pr(
        &self,
        repo: &Path,
        base: &str,
        title: &str,
        body: Option<&str>,
    ) -> Result<String, ProcessError> {
        let mut args = vec!["pr".to_string(), "create".to_string(), "--base".to_string(), base.to_string(), "--title".to_string(), title.to_string()];
        if let Some(body) = body {
            args.push("--body".to_string());
            args.push(body.to_string());
        } else {
            args.push("--fill".to_string());
        }

        let command = ProcessCommandBuilder::new("gh").current_dir(repo).args(&args).build();
        let out = self.runner.run(command).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "gh pr create".into(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout.trim().to_string())
    }
}
