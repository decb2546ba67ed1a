//! End-to-end coverage of `MergeOrchestrator` against a mocked git runner,
//! driving it through `ExplorationStateManager` the way `ExplorationOrchestrator`
//! does, rather than calling git helpers directly.

use std::path::PathBuf;
use std::sync::Arc;

use expedition::clock::SystemClock;
use expedition::lock::FileLockManager;
use expedition::merge::{MergeOptions, MergeOrchestrator, MergeStrategy};
use expedition::model::{ExplorationConfig, WorktreeExploration, WorktreeStatus};
use expedition::state::ExplorationStateManager;
use expedition::subprocess::SubprocessManager;

fn state_manager(root: PathBuf) -> ExplorationStateManager {
    let clock = Arc::new(SystemClock);
    let locks = FileLockManager::new(clock.clone());
    ExplorationStateManager::new(root, locks, clock)
}

async fn seed_completed_worktree(
    state: &ExplorationStateManager,
    worktree_path: PathBuf,
) -> String {
    let exploration = state
        .create_exploration("explore caching strategies".into(), ExplorationConfig { branches: 1, ..Default::default() })
        .await
        .unwrap();

    let id = exploration.id.clone();
    state
        .update_exploration(&id, move |mut e| {
            let mut wt = WorktreeExploration::new(0, "exploration/x-0".into(), worktree_path.display().to_string());
            wt.status = WorktreeStatus::Running;
            let _ = wt.transition_to(WorktreeStatus::Completed);
            e.worktrees.push(wt);
            e
        })
        .await
        .unwrap();

    id
}

#[tokio::test]
async fn direct_merge_creates_backup_and_deletes_worktree() {
    let state_dir = tempfile::tempdir().unwrap();
    let state = state_manager(state_dir.path().to_path_buf());

    let worktree_dir = tempfile::tempdir().unwrap();
    let exploration_id = seed_completed_worktree(&state, worktree_dir.path().to_path_buf()).await;

    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "main"); // current_branch
    mock.expect_success("git", ""); // is_clean
    mock.expect_success("git", ""); // branch_exists(main)
    mock.expect_success("git", ""); // checkout main (backup)
    mock.expect_success("git", ""); // create_branch backup/...
    mock.expect_success("git", ""); // checkout main
    mock.expect_success("git", "abc123"); // head_commit before merge
    mock.expect_success("git", ""); // merge --no-ff
    mock.expect_success("git", "3"); // rev-list --count
    mock.expect_success("git", "def456"); // head_commit after merge
    mock.expect_success("git", ""); // branch -D source

    let repo_path = tempfile::tempdir().unwrap();
    let orchestrator = MergeOrchestrator::new(repo_path.path().to_path_buf(), &subprocess);

    let outcome = orchestrator
        .merge(&state, &exploration_id, 0, MergeOptions::default())
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(!outcome.conflicts_detected);
    assert_eq!(outcome.commits_merged, 3);
    assert_eq!(outcome.merge_commit.as_deref(), Some("def456"));
    assert!(outcome.backup_branch.unwrap().starts_with("backup/main-"));
    assert_eq!(mock.call_count("git"), 11);

    // delete_worktree defaults to true: the directory should be gone.
    assert!(!worktree_dir.path().exists());

    let reloaded = state.load_exploration(&exploration_id).await.unwrap();
    let merge = reloaded.merge.expect("merge metadata recorded");
    assert_eq!(merge.merged_worktree, 0);
    assert_eq!(merge.merge_target_branch, "main");
}

#[tokio::test]
async fn direct_merge_conflict_without_auto_resolve_aborts() {
    let state_dir = tempfile::tempdir().unwrap();
    let state = state_manager(state_dir.path().to_path_buf());

    let worktree_dir = tempfile::tempdir().unwrap();
    let exploration_id = seed_completed_worktree(&state, worktree_dir.path().to_path_buf()).await;

    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "main"); // current_branch
    mock.expect_success("git", ""); // is_clean
    mock.expect_success("git", ""); // branch_exists(main)
    mock.expect_success("git", ""); // checkout main
    mock.expect_success("git", "abc123"); // head_commit before merge
    mock.expect_failure("git", 1, "CONFLICT (content): Merge conflict in src/lib.rs"); // merge --no-ff
    mock.expect_success("git", "UU src/lib.rs\n"); // status --porcelain
    mock.expect_success("git", ""); // merge --abort

    let repo_path = tempfile::tempdir().unwrap();
    let orchestrator = MergeOrchestrator::new(repo_path.path().to_path_buf(), &subprocess);

    let opts = MergeOptions {
        strategy: MergeStrategy::Direct,
        create_backup: false,
        ..MergeOptions::default()
    };
    let outcome = orchestrator.merge(&state, &exploration_id, 0, opts).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.conflicts_detected);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].file, "src/lib.rs");
    assert_eq!(outcome.merge_commit, None);

    // No merge recorded since the merge failed.
    let reloaded = state.load_exploration(&exploration_id).await.unwrap();
    assert!(reloaded.merge.is_none());

    // The worktree directory is untouched: delete_worktree only runs on success.
    assert!(worktree_dir.path().exists());
}

#[tokio::test]
async fn merge_rejects_worktree_that_is_not_completed() {
    let state_dir = tempfile::tempdir().unwrap();
    let state = state_manager(state_dir.path().to_path_buf());

    let exploration = state
        .create_exploration("task".into(), ExplorationConfig { branches: 1, ..Default::default() })
        .await
        .unwrap();
    let exploration_id = exploration.id.clone();
    state
        .update_exploration(&exploration_id, |mut e| {
            let wt = WorktreeExploration::new(0, "exploration/x-0".into(), "/tmp/does-not-matter".into());
            e.worktrees.push(wt);
            e
        })
        .await
        .unwrap();

    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "main"); // current_branch, called before preflight check fails

    let repo_path = tempfile::tempdir().unwrap();
    let orchestrator = MergeOrchestrator::new(repo_path.path().to_path_buf(), &subprocess);

    let err = orchestrator
        .merge(&state, &exploration_id, 0, MergeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, expedition::error::ExplorationError::Validation(_)));
}
