//! C2 — WorktreeManager: safe git worktree CRUD with input validation and
//! rollback, grounded on the host crate's `worktree::manager` (session
//! lifecycle over git worktrees via the subprocess layer) and
//! `worktree::manager_validation` (pure validators split from I/O).

mod validation;

pub use validation::{is_valid_branch_name, validate_path_within_repo};

use std::path::{Path, PathBuf};

use crate::error::{ExplorationError, Result};
use crate::subprocess::git::{GitRunner, WorktreeEntry};
use crate::subprocess::SubprocessManager;

const MAX_CREATE_ATTEMPTS: u32 = 3;
const DEFAULT_WORKTREE_LIMIT: usize = 50;

pub struct WorktreeCreateOptions {
    pub path: PathBuf,
    pub branch: String,
    pub base_ref: String,
    pub force: bool,
}

pub struct WorktreeManager {
    repo_path: PathBuf,
    git: GitRunner,
}

impl WorktreeManager {
    pub fn new(repo_path: PathBuf, subprocess: &SubprocessManager) -> Self {
        Self {
            repo_path,
            git: subprocess.git(),
        }
    }

    fn validate_create(&self, path: &Path, branch: &str) -> Result<()> {
        if !is_valid_branch_name(branch) {
            return Err(ExplorationError::Validation(format!(
                "invalid branch name: {branch}"
            )));
        }
        validate_path_within_repo(&self.repo_path, path)?;
        Ok(())
    }

    /// Create one worktree, retrying on transient git failures up to
    /// `MAX_CREATE_ATTEMPTS` times.
    pub async fn create_worktree(&self, opts: &WorktreeCreateOptions) -> Result<()> {
        self.validate_create(&opts.path, &opts.branch)?;

        let mut last_err = None;
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            match self
                .git
                .create_worktree(&self.repo_path, &opts.path, &opts.branch, &opts.base_ref, opts.force)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, branch = %opts.branch, error = %e, "worktree create attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(ExplorationError::Git(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Create N worktrees, rolling back every successfully-created one if
    /// any later creation fails.
    pub async fn create_multiple_worktrees(
        &self,
        options: &[WorktreeCreateOptions],
    ) -> Result<()> {
        let mut created: Vec<&WorktreeCreateOptions> = Vec::with_capacity(options.len());

        for opts in options {
            match self.create_worktree(opts).await {
                Ok(()) => created.push(opts),
                Err(err) => {
                    for created_opts in created.iter().rev() {
                        if let Err(cleanup_err) = self.remove_worktree(&created_opts.path, true).await {
                            tracing::error!(
                                path = %created_opts.path.display(),
                                error = %cleanup_err,
                                "rollback: failed to remove worktree"
                            );
                        }
                        if let Err(cleanup_err) =
                            self.delete_branch(&created_opts.branch, true).await
                        {
                            tracing::error!(
                                branch = %created_opts.branch,
                                error = %cleanup_err,
                                "rollback: failed to delete branch"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        self.git
            .list_worktrees(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn worktree_exists(&self, path: &Path) -> Result<bool> {
        let entries = self.list_worktrees().await?;
        Ok(entries.iter().any(|e| Path::new(&e.path) == path))
    }

    pub async fn is_branch_name_available(&self, branch: &str) -> Result<bool> {
        let exists = self
            .git
            .branch_exists(&self.repo_path, branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;
        Ok(!exists)
    }

    /// Non-existent worktree on remove is a soft success.
    pub async fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        self.git
            .remove_worktree(&self.repo_path, path, force)
            .await
            .map(|_| ())
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        self.git
            .delete_branch(&self.repo_path, branch, force)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn lock_worktree(&self, path: &Path) -> Result<()> {
        self.git
            .lock_worktree(&self.repo_path, path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn unlock_worktree(&self, path: &Path) -> Result<()> {
        self.git
            .unlock_worktree(&self.repo_path, path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn prune_worktrees(&self) -> Result<()> {
        self.git
            .prune_worktrees(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn check_worktree_limit(&self, max: Option<usize>) -> Result<()> {
        let max = max.unwrap_or(DEFAULT_WORKTREE_LIMIT);
        let count = self.list_worktrees().await?.len();
        if count >= max {
            return Err(ExplorationError::ResourceExhaustion(format!(
                "worktree limit reached: {count} >= {max}"
            )));
        }
        Ok(())
    }

    pub async fn is_repo_clean(&self) -> Result<bool> {
        self.git
            .is_clean(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.git
            .current_branch(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::SubprocessManager;

    #[tokio::test]
    async fn create_multiple_rolls_back_all_on_third_failure() {
        let (subprocess, mock) = SubprocessManager::mock();
        // wt1, wt2 succeed; wt3 fails on every retry attempt.
        mock.expect_success("git", "");
        mock.expect_success("git", "");
        for _ in 0..MAX_CREATE_ATTEMPTS {
            mock.expect_failure("git", 1, "fatal: branch exists");
        }
        // rollback removes wt2 then wt1, each followed by branch delete.
        mock.expect_success("git", "");
        mock.expect_success("git", "");
        mock.expect_success("git", "");
        mock.expect_success("git", "");

        let manager = WorktreeManager::new(PathBuf::from("/repo"), &subprocess);
        let opts = vec![
            WorktreeCreateOptions {
                path: PathBuf::from("/repo/wt-1"),
                branch: "exploration/x-1".to_string(),
                base_ref: "HEAD".to_string(),
                force: false,
            },
            WorktreeCreateOptions {
                path: PathBuf::from("/repo/wt-2"),
                branch: "exploration/x-2".to_string(),
                base_ref: "HEAD".to_string(),
                force: false,
            },
            WorktreeCreateOptions {
                path: PathBuf::from("/repo/wt-3"),
                branch: "exploration/x-3".to_string(),
                base_ref: "HEAD".to_string(),
                force: false,
            },
        ];

        let result = manager.create_multiple_worktrees(&opts).await;
        assert!(result.is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        let repo = Path::new("/repo");
        assert!(validate_path_within_repo(repo, Path::new("/repo/wt-1")).is_ok());
        assert!(validate_path_within_repo(repo, Path::new("/repo/../etc")).is_err());
    }

    #[test]
    fn rejects_invalid_branch_names() {
        assert!(is_valid_branch_name("exploration/foo-1"));
        assert!(!is_valid_branch_name(""));
        assert!(!is_valid_branch_name("-leading-dash"));
        assert!(!is_valid_branch_name("has..dotdot"));
        assert!(!is_valid_branch_name("has space"));
        assert!(!is_valid_branch_name("ends.lock"));
    }
}
