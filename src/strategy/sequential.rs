//! Sequential execution: worktrees are tried one at a time, in branch-index
//! order, stopping at the first one that completes. Grounded on the host
//! crate's reduce-phase iteration (`cook::execution::mapreduce` reduce: a
//! strictly-ordered loop over items with early exit), generalised from
//! reduce-item processing to worktree/container trials.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{collect_results, create_container_config, determine_winner, monitor_containers, ExecutionContext, ExecutionStrategy};
use crate::error::Result;
use crate::events::ExplorationEvent;
use crate::model::{Exploration, WorktreeExploration, WorktreeStatus};
use crate::resource::AllocationRequest;
use crate::worktree::WorktreeCreateOptions;

pub struct SequentialExecutionStrategy;

#[async_trait]
impl ExecutionStrategy for SequentialExecutionStrategy {
    async fn execute(&self, ctx: &ExecutionContext, mut exploration: Exploration) -> Result<Exploration> {
        let base_branch = ctx.worktrees.current_branch().await?;
        ctx.shared.initialize(exploration.branch_count).await?;
        exploration.base_branch = base_branch.clone();

        let _ = exploration.transition_to(crate::model::ExplorationStatus::Running);
        exploration.started_at = Some(ctx.clock.now());
        ctx.state.save_exploration(&exploration).await?;

        let mut completed_index = None;

        for index in 0..exploration.branch_count {
            // 1. Allocate this branch's resources.
            let request = AllocationRequest {
                exploration_id: exploration.id.clone(),
                worktree_index: index,
                cpu_limit: exploration.config.cpu_limit.clone(),
                memory_limit: exploration.config.memory_limit.clone(),
            };
            let resources = ctx.resources.allocate(&request).await?;

            // 2. Create its worktree.
            let branch_name = format!("exploration/{}-{}", exploration.id, index);
            let path = worktree_path(ctx, &exploration.id, index);
            ctx.worktrees
                .create_worktree(&WorktreeCreateOptions {
                    path: path.clone(),
                    branch: branch_name.clone(),
                    base_ref: base_branch.clone(),
                    force: false,
                })
                .await?;

            let mut worktree = WorktreeExploration::new(index, branch_name, path.display().to_string());
            worktree.allocated_resources = Some(resources);

            // 3. Start its container.
            let shared_path = ctx.shared.root().join(format!("worktree-{index}"));
            let container_id = {
                let spec = create_container_config(&worktree, ctx, &exploration.task, "sequential", &path, &shared_path);
                ctx.containers.create(&spec).await?
            };
            worktree.container_id = Some(container_id.clone());
            let _ = worktree.transition_to(WorktreeStatus::Running);
            ctx.events
                .emit(ExplorationEvent::ContainerStarted {
                    exploration_id: exploration.id.clone(),
                    worktree_index: index,
                    container_id,
                })
                .await;

            exploration.worktrees.push(worktree);
            ctx.state.save_exploration(&exploration).await?;

            // 4. Monitor this single worktree until it exits or times out.
            let timeout = Duration::from_secs_f64(exploration.config.timeout_minutes * 60.0);
            monitor_containers(ctx, &mut exploration, timeout).await?;

            let completed = exploration
                .worktree(index)
                .map(|w| w.status == WorktreeStatus::Completed)
                .unwrap_or(false);

            if completed {
                completed_index = Some(index);
                break;
            }

            // Not the winner: mark it Stopped before tearing down its
            // container so a later monitor_containers pass never polls a
            // container that no longer exists.
            let container_name = exploration
                .worktree(index)
                .and_then(|w| w.allocated_resources.as_ref())
                .map(|r| r.container_name.clone());
            if let Some(wt) = exploration.worktree_mut(index) {
                let _ = wt.transition_to(WorktreeStatus::Stopped);
            }
            if let Some(container_name) = container_name {
                let _ = ctx.containers.stop(&container_name, 10).await;
                let _ = ctx.containers.remove(&container_name, true).await;
            }
            ctx.resources.release(&exploration.id, index).await;
        }

        // 5. The comparator ranks every trial and picks the winner; it only
        //    ever picks among worktrees that reached Completed, so this is
        //    consistent with `completed_index` but doesn't just echo it back.
        let winner_index = determine_winner(ctx, &exploration).await;

        collect_results(&mut exploration, winner_index);
        exploration.completed_at = Some(ctx.clock.now());
        let final_status = if completed_index.is_some() {
            crate::model::ExplorationStatus::Completed
        } else {
            crate::model::ExplorationStatus::Failed
        };
        let _ = exploration.transition_to(final_status);
        ctx.state.save_exploration(&exploration).await?;

        ctx.events
            .emit(ExplorationEvent::Completed {
                exploration_id: exploration.id.clone(),
                at: ctx.clock.now(),
                success: completed_index.is_some(),
            })
            .await;

        Ok(exploration)
    }
}

/// Worktree paths must stay under the repo root: `validate_path_within_repo`
/// rejects any absolute path that escapes it.
fn worktree_path(ctx: &ExecutionContext, exploration_id: &str, index: u32) -> PathBuf {
    ctx.repo_path
        .join(".expeditions")
        .join(exploration_id)
        .join(format!("worktree-{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_path_includes_branch_index() {
        let repo = PathBuf::from("/home/user/repo");
        let path = repo.join(".expeditions").join("exp-7").join("worktree-2");
        assert!(path.to_string_lossy().ends_with("worktree-2"));
    }
}
