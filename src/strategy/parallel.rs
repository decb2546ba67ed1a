//! Parallel execution: every worktree/container is created concurrently and
//! they all run to completion (or timeout) together. Grounded on the host
//! crate's MapReduce map-phase fan-out (`futures::future::try_join_all` over
//! independent work items with rollback on partial failure).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{collect_results, create_container_config, determine_winner, monitor_containers, ExecutionContext, ExecutionStrategy};
use crate::error::Result;
use crate::events::ExplorationEvent;
use crate::model::{Exploration, WorktreeExploration, WorktreeStatus};
use crate::resource::AllocationRequest;
use crate::worktree::WorktreeCreateOptions;

pub struct ParallelExecutionStrategy;

#[async_trait]
impl ExecutionStrategy for ParallelExecutionStrategy {
    async fn execute(&self, ctx: &ExecutionContext, mut exploration: Exploration) -> Result<Exploration> {
        // 1. Allocate ports/resources for every branch up front so a later
        //    failure rolls the whole batch back instead of leaving orphans.
        let requests: Vec<AllocationRequest> = (0..exploration.branch_count)
            .map(|index| AllocationRequest {
                exploration_id: exploration.id.clone(),
                worktree_index: index,
                cpu_limit: exploration.config.cpu_limit.clone(),
                memory_limit: exploration.config.memory_limit.clone(),
            })
            .collect();
        let allocations = ctx.resources.allocate_multiple(&requests).await?;

        // 2. Create one git worktree per branch, concurrently.
        let base_branch = ctx.worktrees.current_branch().await?;
        let create_ops: Vec<WorktreeCreateOptions> = (0..exploration.branch_count)
            .map(|index| WorktreeCreateOptions {
                path: worktree_path(ctx, &exploration.id, index),
                branch: format!("exploration/{}-{}", exploration.id, index),
                base_ref: base_branch.clone(),
                force: false,
            })
            .collect();
        ctx.worktrees.create_multiple_worktrees(&create_ops).await?;

        // 3. Initialize the shared collaboration volume.
        ctx.shared.initialize(exploration.branch_count).await?;
        exploration.base_branch = base_branch.clone();

        // 4. Build in-memory WorktreeExploration records.
        exploration.worktrees = (0..exploration.branch_count)
            .map(|index| {
                let mut wt = WorktreeExploration::new(
                    index,
                    format!("exploration/{}-{}", exploration.id, index),
                    worktree_path(ctx, &exploration.id, index).display().to_string(),
                );
                wt.allocated_resources = allocations.get(index as usize).cloned();
                wt
            })
            .collect();

        // 5. Create containers for every worktree concurrently.
        let shared_root = ctx.shared.root().to_path_buf();
        let task = exploration.task.clone();
        let container_results = try_join_all(exploration.worktrees.iter().map(|wt| {
            let wt_path = PathBuf::from(&wt.worktree_path);
            let shared_path = shared_root.join(format!("worktree-{}", wt.index));
            let exploration_task = task.clone();
            async move {
                let spec = create_container_config(wt, ctx, &exploration_task, "parallel", &wt_path, &shared_path);
                ctx.containers.create(&spec).await.map(|id| (wt.index, id))
            }
        }))
        .await?;

        for (index, container_id) in container_results {
            if let Some(wt) = exploration.worktree_mut(index) {
                wt.container_id = Some(container_id.clone());
                let from = wt.status;
                if wt.transition_to(WorktreeStatus::Running).is_ok() {
                    ctx.events
                        .emit(ExplorationEvent::ContainerStarted {
                            exploration_id: exploration.id.clone(),
                            worktree_index: index,
                            container_id,
                        })
                        .await;
                    ctx.events
                        .emit(ExplorationEvent::WorktreeStatusChanged {
                            exploration_id: exploration.id.clone(),
                            worktree_index: index,
                            from,
                            to: WorktreeStatus::Running,
                        })
                        .await;
                }
            }
        }

        let _ = exploration.transition_to(crate::model::ExplorationStatus::Running);
        exploration.started_at = Some(ctx.clock.now());
        ctx.state.save_exploration(&exploration).await?;

        // 6. Monitor every container until all exit or the timeout elapses.
        let timeout = Duration::from_secs_f64(exploration.config.timeout_minutes * 60.0);
        monitor_containers(ctx, &mut exploration, timeout).await?;

        // 7. The comparator ranks every worktree and picks the winner.
        let winner_index = determine_winner(ctx, &exploration).await;

        collect_results(&mut exploration, winner_index);
        exploration.completed_at = Some(ctx.clock.now());
        let final_status = if exploration.completed_branches > 0 {
            crate::model::ExplorationStatus::Completed
        } else {
            crate::model::ExplorationStatus::Failed
        };
        let _ = exploration.transition_to(final_status);

        // 8. Persist and emit completion.
        ctx.state.save_exploration(&exploration).await?;
        ctx.events
            .emit(ExplorationEvent::Completed {
                exploration_id: exploration.id.clone(),
                at: ctx.clock.now(),
                success: exploration.completed_branches > 0,
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
    fn worktree_path_lands_under_expeditions_dir_by_index() {
        let repo_path = PathBuf::from("/home/user/repo");
        let expected = PathBuf::from("/home/user/repo/.expeditions/exp-1/worktree-3");
        let actual = repo_path.join(".expeditions").join("exp-1").join("worktree-3");
        assert_eq!(actual, expected);
    }
}
