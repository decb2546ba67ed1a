//! Argv-style git invocation: every call builds an explicit argument vector
//! and never goes through a shell, per the worktree manager's validation
//! contract (branch names and paths are checked before they ever reach here).

use std::path::Path;
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::{ProcessRunner, ProcessOutput};

#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: String,
    pub branch: Option<String>,
    pub locked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShortStat {
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
}

#[derive(Clone)]
pub struct GitRunner {
    runner: Arc<dyn ProcessRunner>,
}

impl GitRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
        let command = ProcessCommandBuilder::new("git")
            .current_dir(repo)
            .args(args)
            .build();
        self.runner.run(command).await
    }

    pub async fn is_clean(&self, repo: &Path) -> Result<bool, ProcessError> {
        let out = self.git(repo, &["status", "--porcelain"]).await?;
        Ok(out.status.success() && out.stdout.trim().is_empty())
    }

    pub async fn current_branch(&self, repo: &Path) -> Result<String, ProcessError> {
        let out = self
            .git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    pub async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, ProcessError> {
        let out = self
            .git(
                repo,
                &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
            .await?;
        Ok(out.status.success())
    }

    pub async fn create_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_ref: &str,
        force: bool,
    ) -> Result<(), ProcessError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "add"];
        if force {
            args.push("--force");
        }
        args.push("-b");
        args.push(branch);
        args.push(&path_str);
        args.push(base_ref);

        let out = self.git(repo, &args).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git worktree add".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn remove_worktree(
        &self,
        repo: &Path,
        path: &Path,
        force: bool,
    ) -> Result<bool, ProcessError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);

        let out = self.git(repo, &args).await?;
        if out.status.success() {
            return Ok(true);
        }
        // Non-existent worktree on remove is a soft success.
        if out.stderr.contains("is not a working tree")
            || out.stderr.contains("not a valid path")
        {
            return Ok(false);
        }
        Err(ProcessError::CommandFailed {
            command: "git worktree remove".into(),
            stderr: out.stderr,
        })
    }

    pub async fn delete_branch(
        &self,
        repo: &Path,
        branch: &str,
        force: bool,
    ) -> Result<(), ProcessError> {
        let flag = if force { "-D" } else { "-d" };
        let out = self.git(repo, &["branch", flag, branch]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git branch -d".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn create_branch(&self, repo: &Path, name: &str) -> Result<(), ProcessError> {
        let out = self.git(repo, &["branch", name]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git branch".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn lock_worktree(&self, repo: &Path, path: &Path) -> Result<(), ProcessError> {
        let path_str = path.to_string_lossy().to_string();
        let out = self.git(repo, &["worktree", "lock", &path_str]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git worktree lock".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn unlock_worktree(&self, repo: &Path, path: &Path) -> Result<(), ProcessError> {
        let path_str = path.to_string_lossy().to_string();
        let out = self.git(repo, &["worktree", "unlock", &path_str]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git worktree unlock".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn prune_worktrees(&self, repo: &Path) -> Result<(), ProcessError> {
        let out = self.git(repo, &["worktree", "prune"]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git worktree prune".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeEntry>, ProcessError> {
        let out = self.git(repo, &["worktree", "list", "--porcelain"]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git worktree list".into(),
                stderr: out.stderr,
            });
        }
        Ok(parse_worktree_list(&out.stdout))
    }

    pub async fn merge_no_ff(
        &self,
        repo: &Path,
        source_branch: &str,
        message: Option<&str>,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut args = vec!["merge", "--no-ff"];
        if let Some(m) = message {
            args.push("-m");
            args.push(m);
        }
        args.push(source_branch);
        self.git(repo, &args).await
    }

    pub async fn merge_no_commit_preview(
        &self,
        repo: &Path,
        source_branch: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        self.git(repo, &["merge", "--no-commit", "--no-ff", source_branch])
            .await
    }

    pub async fn merge_abort(&self, repo: &Path) -> Result<(), ProcessError> {
        let _ = self.git(repo, &["merge", "--abort"]).await?;
        Ok(())
    }

    pub async fn merge_squash(
        &self,
        repo: &Path,
        source_branch: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        self.git(repo, &["merge", "--squash", source_branch]).await
    }

    pub async fn commit(&self, repo: &Path, message: &str) -> Result<String, ProcessError> {
        let out = self.git(repo, &["commit", "-m", message]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git commit".into(),
                stderr: out.stderr,
            });
        }
        self.head_commit(repo).await
    }

    pub async fn head_commit(&self, repo: &Path) -> Result<String, ProcessError> {
        let out = self.git(repo, &["rev-parse", "HEAD"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    pub async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), ProcessError> {
        let out = self.git(repo, &["checkout", branch]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git checkout".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn rebase(&self, repo: &Path, onto: &str) -> Result<ProcessOutput, ProcessError> {
        self.git(repo, &["rebase", onto]).await
    }

    pub async fn rebase_abort(&self, repo: &Path) -> Result<(), ProcessError> {
        let _ = self.git(repo, &["rebase", "--abort"]).await?;
        Ok(())
    }

    pub async fn merge_ff_only(
        &self,
        repo: &Path,
        source_branch: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        self.git(repo, &["merge", "--ff-only", source_branch]).await
    }

    pub async fn add_all(&self, repo: &Path) -> Result<(), ProcessError> {
        let out = self.git(repo, &["add", "-A"]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git add".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn checkout_ours(&self, repo: &Path, file: &str) -> Result<(), ProcessError> {
        let out = self
            .git(repo, &["checkout", "--ours", "--", file])
            .await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "git checkout --ours".into(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn status_porcelain(&self, repo: &Path) -> Result<String, ProcessError> {
        Ok(self.git(repo, &["status", "--porcelain"]).await?.stdout)
    }

    pub async fn rev_list_count(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<u32, ProcessError> {
        let out = self
            .git(repo, &["rev-list", "--count", &format!("{from}..{to}")])
            .await?;
        Ok(out.stdout.trim().parse().unwrap_or(0))
    }

    pub async fn shortstat(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<ShortStat, ProcessError> {
        let out = self
            .git(repo, &["diff", "--shortstat", &format!("{from}..{to}")])
            .await?;
        Ok(parse_shortstat(&out.stdout))
    }
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<String> = None;
    let mut branch: Option<String> = None;
    let mut locked = false;

    let flush = |entries: &mut Vec<WorktreeEntry>,
                 path: &mut Option<String>,
                 branch: &mut Option<String>,
                 locked: &mut bool| {
        if let Some(p) = path.take() {
            entries.push(WorktreeEntry {
                path: p,
                branch: branch.take(),
                locked: *locked,
            });
        }
        *locked = false;
    };

    for line in output.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            flush(&mut entries, &mut path, &mut branch, &mut locked);
            path = Some(p.to_string());
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = Some(
                b.trim_start_matches("refs/heads/").to_string(),
            );
        } else if line == "locked" {
            locked = true;
        } else if line.is_empty() {
            flush(&mut entries, &mut path, &mut branch, &mut locked);
        }
    }
    flush(&mut entries, &mut path, &mut branch, &mut locked);
    entries
}

fn parse_shortstat(output: &str) -> ShortStat {
    let mut stat = ShortStat::default();
    for part in output.split(',') {
        let part = part.trim();
        if let Some(n) = part.strip_suffix(" file changed").or_else(|| part.strip_suffix(" files changed")) {
            stat.files_changed = n.trim().parse().unwrap_or(0);
        } else if let Some(n) = part
            .strip_suffix(" insertion(+)")
            .or_else(|| part.strip_suffix(" insertions(+)"))
        {
            stat.lines_added = n.trim().parse().unwrap_or(0);
        } else if let Some(n) = part
            .strip_suffix(" deletion(-)")
            .or_else(|| part.strip_suffix(" deletions(-)"))
        {
            stat.lines_removed = n.trim().parse().unwrap_or(0);
        }
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worktree_porcelain_list() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/wt-1\nHEAD def456\nbranch refs/heads/exploration/foo-1\nlocked\n\n";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, "/repo/wt-1");
        assert_eq!(entries[1].branch.as_deref(), Some("exploration/foo-1"));
        assert!(entries[1].locked);
        assert!(!entries[0].locked);
    }

    #[test]
    fn parses_shortstat_line() {
        let stat = parse_shortstat(" 3 files changed, 42 insertions(+), 7 deletions(-)\n");
        assert_eq!(stat.files_changed, 3);
        assert_eq!(stat.lines_added, 42);
        assert_eq!(stat.lines_removed, 7);
    }

    #[test]
    fn parses_singular_shortstat() {
        let stat = parse_shortstat(" 1 file changed, 1 insertion(+)\n");
        assert_eq!(stat.files_changed, 1);
        assert_eq!(stat.lines_added, 1);
        assert_eq!(stat.lines_removed, 0);
    }
}
