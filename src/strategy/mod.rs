//! C8 — execution strategies: the two ways an exploration can drive its
//! worktrees through container lifecycles. Grounded on the host crate's
//! `cook::execution::mapreduce` split between a parallel map phase and a
//! strictly-ordered reduce phase, generalised to worktree/container
//! orchestration instead of work-item batches.

pub mod parallel;
pub mod sequential;

pub use parallel::ParallelExecutionStrategy;
pub use sequential::SequentialExecutionStrategy;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::clock::Clock;
use crate::comparator::ResultComparator;
use crate::container::{ContainerManager, ContainerSpec};
use crate::error::Result;
use crate::events::{EventBus, ExplorationEvent};
use crate::model::{ContainerStats, Exploration, ExplorationConfig, Progress, WorktreeExploration, WorktreeStatus};
use crate::resource::ResourceAllocator;
use crate::shared_volume::SharedVolumeManager;
use crate::state::ExplorationStateManager;
use crate::subprocess::SubprocessManager;
use crate::worktree::WorktreeManager;

const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a strategy needs to drive worktrees through their lifecycle,
/// bundled so `create_execution_strategy` can hand out one value regardless
/// of which strategy it builds.
pub struct ExecutionContext {
    pub exploration_id: String,
    pub repo_path: PathBuf,
    pub state: Arc<ExplorationStateManager>,
    pub worktrees: Arc<WorktreeManager>,
    pub containers: Arc<ContainerManager>,
    pub resources: Arc<ResourceAllocator>,
    pub shared: Arc<SharedVolumeManager>,
    pub subprocess: SubprocessManager,
    pub events: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    pub config: ExplorationConfig,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Drives `exploration` through its worktrees and returns the final
    /// persisted state.
    async fn execute(&self, ctx: &ExecutionContext, exploration: Exploration) -> Result<Exploration>;
}

/// Builds the per-worktree container spec shared by both strategies: env
/// wiring to the shared volume, the allocated port, and the worktree/shared
/// volume bind mounts.
///
/// The container env contract is fixed: `EXPLORATION_ID`, `TASK`,
/// `WORKTREE_ID=worktree-<idx>`, `WORKTREE_INDEX`, `STRATEGY`, and
/// `SHARED_VOLUME=/shared` (the mount point `volumes_for` gives the shared
/// path), so whatever runs inside the container can find its task, its
/// scratch directory, and the pools it collaborates through.
pub fn create_container_config<'a>(
    worktree: &'a WorktreeExploration,
    ctx: &'a ExecutionContext,
    task: &str,
    strategy_name: &str,
    worktree_path: &'a std::path::Path,
    shared_path: &'a std::path::Path,
) -> ContainerSpec<'a> {
    let mut env = HashMap::new();
    env.insert("EXPLORATION_ID".to_string(), ctx.exploration_id.clone());
    env.insert("TASK".to_string(), task.to_string());
    env.insert("WORKTREE_ID".to_string(), worktree.worktree_id());
    env.insert("WORKTREE_INDEX".to_string(), worktree.index.to_string());
    env.insert("STRATEGY".to_string(), strategy_name.to_string());
    env.insert("SHARED_VOLUME".to_string(), "/shared".to_string());

    let cpu_limit = ResourceAllocator::validate_cpu_limit(&ctx.config.cpu_limit).unwrap_or(1.0);

    ContainerSpec {
        name: worktree
            .allocated_resources
            .as_ref()
            .map(|r| r.container_name.as_str())
            .unwrap_or("exploration-unnamed"),
        image: &ctx.config.docker_image,
        cpu_limit,
        memory_limit: &ctx.config.memory_limit,
        env,
        port_mapping: worktree.allocated_resources.as_ref().and_then(|r| r.port).map(|p| (p, p)),
        worktree_path,
        shared_path,
        command: None,
    }
}

/// Polls every worktree's container every [`MONITOR_POLL_INTERVAL`] until all
/// have exited or `timeout` elapses, persisting stats and progress after
/// each round. Poll errors are logged and treated as "still running" so a
/// single flaky `docker stats` invocation doesn't abort the whole
/// exploration.
pub async fn monitor_containers(
    ctx: &ExecutionContext,
    exploration: &mut Exploration,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let mut all_exited = true;

        for worktree in exploration.worktrees.iter_mut() {
            let Some(container_name) = worktree.allocated_resources.as_ref().map(|r| r.container_name.clone()) else {
                continue;
            };
            if worktree.status != WorktreeStatus::Running {
                continue;
            }

            if let Ok(bytes) = tokio::fs::read(ctx.shared.worktree_dir(worktree.index).join("progress.json")).await {
                if let Ok(progress) = serde_json::from_slice::<Progress>(&bytes) {
                    worktree.progress = progress;
                }
            }

            match ctx.containers.get_stats(&container_name).await {
                Ok(Some(stats)) => {
                    let running = stats.status == "running";
                    worktree.container_stats = Some(stats.clone());
                    ctx.events
                        .emit(ExplorationEvent::ContainerStats {
                            exploration_id: exploration.id.clone(),
                            worktree_index: worktree.index,
                            stats,
                        })
                        .await;
                    if running {
                        all_exited = false;
                    } else {
                        transition_worktree(worktree, WorktreeStatus::Completed, ctx, exploration.id.as_str()).await;
                    }
                }
                Ok(None) => {
                    transition_worktree(worktree, WorktreeStatus::Completed, ctx, exploration.id.as_str()).await;
                }
                Err(err) => {
                    tracing::warn!(worktree = worktree.index, error = %err, "poll failed, assuming still running");
                    all_exited = false;
                }
            }
        }

        ctx.state.save_exploration(exploration).await?;

        if all_exited {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(exploration_id = %exploration.id, "monitor timed out before all containers exited");
            return Ok(());
        }

        sleep(MONITOR_POLL_INTERVAL).await;
    }
}

async fn transition_worktree(
    worktree: &mut WorktreeExploration,
    next: WorktreeStatus,
    ctx: &ExecutionContext,
    exploration_id: &str,
) {
    let from = worktree.status;
    if worktree.transition_to(next).is_ok() {
        ctx.events
            .emit(ExplorationEvent::WorktreeStatusChanged {
                exploration_id: exploration_id.to_string(),
                worktree_index: worktree.index,
                from,
                to: next,
            })
            .await;
    }
}

/// Finalizes `completed_branches`, overall `status` and the `results`
/// summary once every worktree has reached a terminal state (or the
/// strategy gave up on it).
pub fn collect_results(exploration: &mut Exploration, winner_index: Option<u32>) {
    let completed = exploration
        .worktrees
        .iter()
        .filter(|w| w.status == WorktreeStatus::Completed)
        .count() as u32;

    exploration.completed_branches = completed;

    let success = completed > 0;
    exploration.results = Some(crate::model::ExplorationResults {
        mode: exploration.mode,
        completed_branches: completed,
        total_branches: exploration.branch_count,
        success,
        winner_index,
    });
}

/// Runs the comparator over the finished worktrees and returns its top
/// completed entry. This is the single source of truth for `winner_index`;
/// strategies must not track their own notion of "the winner" separately.
pub async fn determine_winner(ctx: &ExecutionContext, exploration: &Exploration) -> Option<u32> {
    let insights = ctx
        .state
        .load_insights_pool(&exploration.id)
        .await
        .map(|pool| pool.insights)
        .unwrap_or_default();
    let decisions = ctx
        .state
        .load_decisions_pool(&exploration.id)
        .await
        .map(|pool| pool.decisions)
        .unwrap_or_default();

    let comparator = ResultComparator::new(&ctx.subprocess);
    comparator
        .compare(exploration, &insights, &decisions, &ctx.repo_path, &exploration.base_branch)
        .await
        .ok()
        .and_then(|report| report.winner_index)
}

/// Dispatches by execution mode name. Takes a string rather than
/// [`ExecutionMode`](crate::model::ExecutionMode) directly so mode names
/// arriving from config files or CLI flags get a typed validation error
/// instead of a panic on an unrecognized variant.
pub fn create_execution_strategy(mode: &str) -> Result<Arc<dyn ExecutionStrategy>> {
    match mode {
        "parallel" => Ok(Arc::new(ParallelExecutionStrategy)),
        "sequential" => Ok(Arc::new(SequentialExecutionStrategy)),
        other => Err(crate::error::ExplorationError::Validation(format!(
            "unknown execution mode: {other}"
        ))),
    }
}

pub fn strategy_for_mode(mode: crate::model::ExecutionMode) -> Arc<dyn ExecutionStrategy> {
    match mode {
        crate::model::ExecutionMode::Parallel => Arc::new(ParallelExecutionStrategy),
        crate::model::ExecutionMode::Sequential => Arc::new(SequentialExecutionStrategy),
    }
}

pub(crate) fn avg_container_stats(stats: &[ContainerStats]) -> Option<ContainerStats> {
    if stats.is_empty() {
        return None;
    }
    let n = stats.len() as f64;
    Some(ContainerStats {
        cpu_percent: stats.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
        memory_mb: stats.iter().map(|s| s.memory_mb).sum::<f64>() / n,
        uptime_seconds: stats.iter().map(|s| s.uptime_seconds).max().unwrap_or(0),
        status: stats.last().map(|s| s.status.clone()).unwrap_or_default(),
    })
}
