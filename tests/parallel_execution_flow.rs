//! Drives `ParallelExecutionStrategy` end to end against mocked git/docker,
//! the way `ExplorationOrchestrator::run_exploration` wires it up. Exists to
//! catch the two classes of bug that unit tests on individual modules can't:
//! container lookups keyed by the wrong identifier, and worktree paths that
//! escape the repo root.

use std::sync::Arc;

use expedition::clock::SystemClock;
use expedition::container::ContainerManager;
use expedition::events::EventBus;
use expedition::lock::FileLockManager;
use expedition::model::{ExplorationConfig, ExplorationStatus, WorktreeStatus};
use expedition::resource::ResourceAllocator;
use expedition::shared_volume::SharedVolumeManager;
use expedition::state::ExplorationStateManager;
use expedition::strategy::{ExecutionContext, ExecutionStrategy, ParallelExecutionStrategy};
use expedition::subprocess::SubprocessManager;
use expedition::worktree::WorktreeManager;

#[tokio::test]
async fn single_branch_runs_to_completion_under_repo_root() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();

    let clock = Arc::new(SystemClock);
    let locks = FileLockManager::new(clock.clone());
    let state = Arc::new(ExplorationStateManager::new(state_dir.path().to_path_buf(), locks, clock.clone()));

    let config = ExplorationConfig { branches: 1, ..Default::default() };
    let exploration = state.create_exploration("fix the flaky test".into(), config.clone()).await.unwrap();
    let exploration_id = exploration.id.clone();

    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "main"); // current_branch
    mock.expect_success("git", ""); // worktree add
    mock.expect_success("docker", "abc123def456"); // container create returns id
    mock.expect_failure("docker", 1, "Error response from daemon: No such container: anything"); // stats poll: soft-missing -> treated as exited

    let worktrees = Arc::new(WorktreeManager::new(repo_dir.path().to_path_buf(), &subprocess));
    let containers = Arc::new(ContainerManager::new(&subprocess, clock.clone()));
    let resources = Arc::new(ResourceAllocator::with_default_range());
    let shared_root = state.shared_dir(&exploration_id);
    let shared = Arc::new(SharedVolumeManager::new(shared_root, exploration_id.clone()));
    let events = Arc::new(EventBus::new());

    let ctx = ExecutionContext {
        exploration_id: exploration_id.clone(),
        repo_path: repo_dir.path().to_path_buf(),
        state: state.clone(),
        worktrees,
        containers,
        resources: resources.clone(),
        shared,
        subprocess,
        events,
        clock,
        config,
    };

    let finished = ParallelExecutionStrategy.execute(&ctx, exploration).await.unwrap();

    assert_eq!(finished.status, ExplorationStatus::Completed);
    assert_eq!(finished.completed_branches, 1);
    let wt = finished.worktree(0).expect("worktree 0 recorded");
    assert_eq!(wt.status, WorktreeStatus::Completed);

    // Path must land under the repo root, not beside it.
    assert!(wt.worktree_path.starts_with(repo_dir.path().to_string_lossy().as_ref()));
    assert!(wt.worktree_path.contains(".expeditions"));

    let results = finished.results.expect("results recorded");
    assert!(results.success);
    assert_eq!(results.winner_index, Some(0));

    // The strategy itself never releases resources on a winning run; that's
    // `ExplorationOrchestrator::cleanup`'s job, so the port stays reserved.
    assert_eq!(resources.available_count().await, 100);

    let reloaded = state.load_exploration(&exploration_id).await.unwrap();
    assert_eq!(reloaded.status, ExplorationStatus::Completed);
}
