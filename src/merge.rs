//! C10 — MergeOrchestrator: validates a completed worktree, merges its
//! branch back (direct/squash/rebase), detects and optionally
//! auto-resolves conflicts, and tags a backup branch first. Grounded on
//! `subprocess::git::GitRunner`'s merge/rebase wrappers, generalised from
//! the host crate's single-strategy merge in `worktree::manager` to the
//! three strategies this task needs.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{ExplorationError, Result};
use crate::model::{Exploration, MergeMetadata};
use crate::state::ExplorationStateManager;
use crate::subprocess::gh::GhRunner;
use crate::subprocess::git::GitRunner;
use crate::subprocess::SubprocessManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Direct,
    Squash,
    Rebase,
}

#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub file: String,
    pub kind: ConflictKind,
    pub resolved: bool,
    pub resolution_strategy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Content,
    Delete,
    Rename,
}

pub struct MergeOptions {
    pub strategy: MergeStrategy,
    pub target_branch: Option<String>,
    pub create_backup: bool,
    pub auto_resolve_conflicts: bool,
    pub delete_worktree: bool,
    pub create_pr: bool,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Direct,
            target_branch: None,
            create_backup: true,
            auto_resolve_conflicts: false,
            delete_worktree: true,
            create_pr: false,
            pr_title: None,
            pr_body: None,
        }
    }
}

pub struct MergeOutcome {
    pub success: bool,
    pub conflicts_detected: bool,
    pub conflicts: Vec<ConflictInfo>,
    pub merge_commit: Option<String>,
    pub commits_merged: u32,
    pub backup_branch: Option<String>,
    pub pr_url: Option<String>,
}

pub struct MergePreview {
    pub can_merge: bool,
    pub commits_to_merge: u32,
    pub conflicts: Vec<ConflictInfo>,
    pub files_changed: u32,
}

pub struct MergeOrchestrator {
    repo_path: PathBuf,
    git: GitRunner,
    gh: GhRunner,
}

impl MergeOrchestrator {
    pub fn new(repo_path: PathBuf, subprocess: &SubprocessManager) -> Self {
        Self { repo_path, git: subprocess.git(), gh: subprocess.gh() }
    }

    async fn validate_preflight(
        &self,
        state: &ExplorationStateManager,
        exploration_id: &str,
        worktree_index: u32,
        target_branch: &str,
    ) -> Result<Exploration> {
        let exploration = state.load_exploration(exploration_id).await?;
        let worktree = exploration
            .worktree(worktree_index)
            .ok_or_else(|| ExplorationError::Validation(format!("no worktree {worktree_index}")))?;

        if worktree.status != crate::model::WorktreeStatus::Completed {
            return Err(ExplorationError::Validation(format!(
                "worktree {worktree_index} is not completed (status = {:?})",
                worktree.status
            )));
        }

        if !Path::new(&worktree.worktree_path).exists() {
            return Err(ExplorationError::Validation(format!(
                "worktree path {} does not exist",
                worktree.worktree_path
            )));
        }

        if !self.git.is_clean(&self.repo_path).await.map_err(|e| ExplorationError::Git(e.to_string()))? {
            return Err(ExplorationError::Validation(
                "host repository working tree is not clean".to_string(),
            ));
        }

        if !self
            .git
            .branch_exists(&self.repo_path, target_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?
        {
            return Err(ExplorationError::Validation(format!(
                "target branch {target_branch} does not exist"
            )));
        }

        Ok(exploration)
    }

    pub async fn merge(
        &self,
        state: &ExplorationStateManager,
        exploration_id: &str,
        worktree_index: u32,
        opts: MergeOptions,
    ) -> Result<MergeOutcome> {
        let current_branch = self
            .git
            .current_branch(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;
        let target_branch = opts.target_branch.clone().unwrap_or(current_branch);

        let exploration = self
            .validate_preflight(state, exploration_id, worktree_index, &target_branch)
            .await?;
        let worktree = exploration.worktree(worktree_index).expect("validated above");
        let source_branch = worktree.branch_name.clone();
        let worktree_path = PathBuf::from(&worktree.worktree_path);

        let backup_branch = if opts.create_backup {
            let name = format!("backup/{target_branch}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"));
            self.git
                .checkout(&self.repo_path, &target_branch)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            self.git
                .create_branch(&self.repo_path, &name)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            Some(name)
        } else {
            None
        };

        self.git
            .checkout(&self.repo_path, &target_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let outcome = match opts.strategy {
            MergeStrategy::Direct => self.merge_direct(&source_branch, opts.auto_resolve_conflicts).await?,
            MergeStrategy::Squash => self.merge_squash(&source_branch).await?,
            MergeStrategy::Rebase => self.merge_rebase(&source_branch, &target_branch).await?,
        };

        let mut outcome = outcome;
        outcome.backup_branch = backup_branch;

        if outcome.success {
            if opts.create_pr {
                let title = opts.pr_title.clone().unwrap_or_else(|| format!("Merge exploration branch {source_branch}"));
                outcome.pr_url = self
                    .gh
                    .create_pr(&self.repo_path, &target_branch, &title, opts.pr_body.as_deref())
                    .await
                    .ok();
            }

            if opts.delete_worktree {
                let _ = tokio::fs::remove_dir_all(&worktree_path).await;
                let _ = self.git.delete_branch(&self.repo_path, &source_branch, true).await;
            }

            let merge_target = target_branch.clone();
            state
                .update_exploration(exploration_id, move |mut e| {
                    e.merge = Some(MergeMetadata {
                        merged_at: Utc::now(),
                        merged_worktree: worktree_index,
                        merge_target_branch: merge_target.clone(),
                    });
                    e
                })
                .await?;
        }

        Ok(outcome)
    }

    async fn merge_direct(&self, source_branch: &str, auto_resolve: bool) -> Result<MergeOutcome> {
        let target_before = self
            .git
            .head_commit(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let out = self
            .git
            .merge_no_ff(&self.repo_path, source_branch, None)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        if out.status.success() {
            let commit_count = self
                .git
                .rev_list_count(&self.repo_path, &target_before, source_branch)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            return Ok(MergeOutcome {
                success: true,
                conflicts_detected: false,
                conflicts: Vec::new(),
                merge_commit: self.git.head_commit(&self.repo_path).await.ok(),
                commits_merged: commit_count,
                backup_branch: None,
                pr_url: None,
            });
        }

        self.resolve_or_abort(auto_resolve).await
    }

    async fn merge_squash(&self, source_branch: &str) -> Result<MergeOutcome> {
        let out = self
            .git
            .merge_squash(&self.repo_path, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        if !out.status.success() {
            return self.resolve_or_abort(false).await;
        }

        let message = format!("Squash merge exploration branch {source_branch}");
        let commit = self
            .git
            .commit(&self.repo_path, &message)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        Ok(MergeOutcome {
            success: true,
            conflicts_detected: false,
            conflicts: Vec::new(),
            merge_commit: Some(commit),
            commits_merged: 1,
            backup_branch: None,
            pr_url: None,
        })
    }

    async fn merge_rebase(&self, source_branch: &str, target_branch: &str) -> Result<MergeOutcome> {
        self.git
            .checkout(&self.repo_path, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let out = self
            .git
            .rebase(&self.repo_path, target_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        if !out.status.success() {
            let _ = self.git.rebase_abort(&self.repo_path).await;
            self.git
                .checkout(&self.repo_path, target_branch)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            return Err(ExplorationError::Merge(format!("rebase failed: {}", out.stderr)));
        }

        self.git
            .checkout(&self.repo_path, target_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let out = self
            .git
            .merge_ff_only(&self.repo_path, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        if !out.status.success() {
            return Err(ExplorationError::Merge(format!(
                "fast-forward merge after rebase failed: {}",
                out.stderr
            )));
        }

        Ok(MergeOutcome {
            success: true,
            conflicts_detected: false,
            conflicts: Vec::new(),
            merge_commit: self.git.head_commit(&self.repo_path).await.ok(),
            commits_merged: 1,
            backup_branch: None,
            pr_url: None,
        })
    }

    async fn resolve_or_abort(&self, auto_resolve: bool) -> Result<MergeOutcome> {
        let status = self
            .git
            .status_porcelain(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;
        let mut conflicts = parse_conflicts(&status);

        if !auto_resolve {
            self.git
                .merge_abort(&self.repo_path)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            return Ok(MergeOutcome {
                success: false,
                conflicts_detected: true,
                conflicts,
                merge_commit: None,
                commits_merged: 0,
                backup_branch: None,
                pr_url: None,
            });
        }

        for conflict in &mut conflicts {
            self.git
                .checkout_ours(&self.repo_path, &conflict.file)
                .await
                .map_err(|e| ExplorationError::Git(e.to_string()))?;
            conflict.resolved = true;
            conflict.resolution_strategy = Some("ours".to_string());
        }

        self.git
            .add_all(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;
        let commit = self
            .git
            .commit(&self.repo_path, "Auto-resolve exploration merge conflicts (ours)")
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        Ok(MergeOutcome {
            success: true,
            conflicts_detected: true,
            conflicts,
            merge_commit: Some(commit),
            commits_merged: 1,
            backup_branch: None,
            pr_url: None,
        })
    }

    /// Dry-run: attempt the merge without committing, report what would
    /// happen, then always abort.
    pub async fn preview(&self, source_branch: &str) -> Result<MergePreview> {
        let target_before = self
            .git
            .head_commit(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let commits_to_merge = self
            .git
            .rev_list_count(&self.repo_path, &target_before, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let shortstat = self
            .git
            .shortstat(&self.repo_path, &target_before, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let out = self
            .git
            .merge_no_commit_preview(&self.repo_path, source_branch)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        let status = self
            .git
            .status_porcelain(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;
        let conflicts = parse_conflicts(&status);

        self.git
            .merge_abort(&self.repo_path)
            .await
            .map_err(|e| ExplorationError::Git(e.to_string()))?;

        Ok(MergePreview {
            can_merge: out.status.success() && conflicts.is_empty(),
            commits_to_merge,
            conflicts,
            files_changed: shortstat.files_changed,
        })
    }
}

fn parse_conflicts(status_porcelain: &str) -> Vec<ConflictInfo> {
    let mut conflicts = Vec::new();
    for line in status_porcelain.lines() {
        if line.len() < 3 {
            continue;
        }
        let marker = &line[..2];
        let file = line[3..].to_string();
        let kind = match marker {
            "UU" | "AA" | "UA" | "AU" => Some(ConflictKind::Content),
            "DU" | "UD" => Some(ConflictKind::Delete),
            "RU" | "UR" => Some(ConflictKind::Rename),
            _ => None,
        };
        if let Some(kind) = kind {
            conflicts.push(ConflictInfo { file, kind, resolved: false, resolution_strategy: None });
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_delete_conflict_markers() {
        let status = "UU src/lib.rs\nDU src/old.rs\nM  src/clean.rs\n";
        let conflicts = parse_conflicts(status);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].file, "src/lib.rs");
        assert_eq!(conflicts[0].kind, ConflictKind::Content);
        assert_eq!(conflicts[1].kind, ConflictKind::Delete);
    }

    #[test]
    fn clean_status_has_no_conflicts() {
        assert!(parse_conflicts("M  src/clean.rs\n").is_empty());
    }
}
