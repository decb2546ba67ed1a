//! C7 — ExplorationStateManager: the on-disk layout and CRUD surface over
//! `Exploration` documents, grounded on the host crate's session state
//! persistence (`worktree::manager` writing `.prodigy/session_state.json`
//! through a lock-protected atomic write) generalised to a directory of
//! explorations instead of one session file per worktree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{ExplorationError, Result};
use crate::lock::FileLockManager;
use crate::model::{DecisionsPool, Exploration, ExplorationConfig, ExplorationStatus, ExplorationSummary, InsightsPool};

pub struct ExplorationStateManager {
    root: PathBuf,
    locks: FileLockManager,
    clock: Arc<dyn Clock>,
}

/// `listExplorations` query: both fields are ANDed, either may be omitted.
#[derive(Debug, Clone, Default)]
pub struct ExplorationFilter {
    pub status: Option<ExplorationStatus>,
    pub task_contains: Option<String>,
}

impl ExplorationStateManager {
    pub fn new(root: PathBuf, locks: FileLockManager, clock: Arc<dyn Clock>) -> Self {
        Self { root, locks, clock }
    }

    pub fn exploration_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn exploration_path(&self, id: &str) -> PathBuf {
        self.exploration_dir(id).join("exploration.json")
    }

    pub fn shared_dir(&self, id: &str) -> PathBuf {
        self.exploration_dir(id).join("shared")
    }

    pub async fn create_exploration(&self, task: String, config: ExplorationConfig) -> Result<Exploration> {
        let now = self.clock.now();
        let id = format!("exploration-{}", uuid::Uuid::new_v4());
        let exploration = Exploration {
            id: id.clone(),
            task,
            mode: config.mode,
            branch_count: config.branches,
            config,
            status: ExplorationStatus::Pending,
            base_branch: String::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            completed_branches: 0,
            worktrees: Vec::new(),
            results: None,
            merge: None,
            created_at: now,
            last_updated: now,
        };

        tokio::fs::create_dir_all(self.exploration_dir(&id)).await?;
        self.save_exploration(&exploration).await?;
        Ok(exploration)
    }

    pub async fn save_exploration(&self, exploration: &Exploration) -> Result<()> {
        exploration
            .check_invariants()
            .map_err(ExplorationError::Validation)?;
        self.locks
            .write_with_lock(&self.exploration_path(&exploration.id), exploration)
            .await
    }

    pub async fn load_exploration(&self, id: &str) -> Result<Exploration> {
        let path = self.exploration_path(id);
        if !path.exists() {
            return Err(ExplorationError::NotFound(id.to_string()));
        }
        self.locks.read_with_lock(&path).await
    }

    /// Read-modify-write under lock, stamping `last_updated` before persisting.
    pub async fn update_exploration<F>(&self, id: &str, updater: F) -> Result<Exploration>
    where
        F: FnOnce(Exploration) -> Exploration,
    {
        let path = self.exploration_path(id);
        if !path.exists() {
            return Err(ExplorationError::NotFound(id.to_string()));
        }
        let now = self.clock.now();
        let updated = self
            .locks
            .update_with_lock(&path, move |current: Exploration| {
                let mut next = updater(current);
                next.last_updated = now;
                next
            })
            .await?;
        updated
            .check_invariants()
            .map_err(ExplorationError::Validation)?;
        Ok(updated)
    }

    pub async fn delete_exploration(&self, id: &str) -> Result<()> {
        let dir = self.exploration_dir(id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Lists explorations matching `filter`, newest-started first.
    pub async fn list_explorations(&self, filter: &ExplorationFilter) -> Result<Vec<ExplorationSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let needle = filter.task_contains.as_ref().map(|s| s.to_lowercase());

        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if let Ok(exploration) = self.load_exploration(&id).await {
                if let Some(status) = filter.status {
                    if exploration.status != status {
                        continue;
                    }
                }
                if let Some(needle) = &needle {
                    if !exploration.task.to_lowercase().contains(needle.as_str()) {
                        continue;
                    }
                }
                summaries.push(ExplorationSummary {
                    id: exploration.id,
                    task: exploration.task,
                    status: exploration.status,
                    branch_count: exploration.branch_count,
                    started_at: exploration.started_at,
                });
            }
        }
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    pub async fn list_by_status(&self, status: ExplorationStatus) -> Result<Vec<ExplorationSummary>> {
        self.list_explorations(&ExplorationFilter { status: Some(status), task_contains: None })
            .await
    }

    pub async fn load_insights_pool(&self, id: &str) -> Result<InsightsPool> {
        self.locks
            .read_with_lock(&self.shared_dir(id).join("insights-pool.json"))
            .await
    }

    pub async fn load_decisions_pool(&self, id: &str) -> Result<DecisionsPool> {
        self.locks
            .read_with_lock(&self.shared_dir(id).join("decisions-pool.json"))
            .await
    }

    pub fn path_for(&self, id: &str, relative: &str) -> PathBuf {
        self.exploration_dir(id).join(relative)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::TimeZone;

    fn manager(root: PathBuf) -> ExplorationStateManager {
        let clock = Arc::new(SystemClock);
        let locks = FileLockManager::new(clock.clone());
        ExplorationStateManager::new(root, locks, clock)
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());

        let created = mgr
            .create_exploration("fix the flaky test".into(), ExplorationConfig { branches: 3, ..Default::default() })
            .await
            .unwrap();

        let loaded = mgr.load_exploration(&created.id).await.unwrap();
        assert_eq!(loaded.task, "fix the flaky test");
        assert_eq!(loaded.branch_count, 3);
        assert_eq!(loaded.status, ExplorationStatus::Pending);
    }

    #[tokio::test]
    async fn load_missing_exploration_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let err = mgr.load_exploration("does-not-exist").await.unwrap_err();
        assert!(matches!(err, ExplorationError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_exploration_persists_and_stamps_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let created = mgr
            .create_exploration("task".into(), ExplorationConfig::default())
            .await
            .unwrap();

        let updated = mgr
            .update_exploration(&created.id, |mut e| {
                e.status = ExplorationStatus::Running;
                e.started_at = Some(chrono::Utc::now());
                e
            })
            .await
            .unwrap();

        assert_eq!(updated.status, ExplorationStatus::Running);
        let reloaded = mgr.load_exploration(&created.id).await.unwrap();
        assert_eq!(reloaded.status, ExplorationStatus::Running);
    }

    #[tokio::test]
    async fn update_rejects_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let created = mgr
            .create_exploration("task".into(), ExplorationConfig { branches: 2, ..Default::default() })
            .await
            .unwrap();

        let err = mgr
            .update_exploration(&created.id, |mut e| {
                e.completed_branches = 5;
                e
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExplorationError::Validation(_)));
    }

    #[tokio::test]
    async fn list_explorations_returns_all_created() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        mgr.create_exploration("a".into(), ExplorationConfig::default()).await.unwrap();
        mgr.create_exploration("b".into(), ExplorationConfig::default()).await.unwrap();

        let summaries = mgr.list_explorations(&ExplorationFilter::default()).await.unwrap();
        assert_eq!(summaries.len(), 2);
    }

    #[tokio::test]
    async fn list_explorations_filters_by_task_substring() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        mgr.create_exploration("fix the flaky test".into(), ExplorationConfig::default()).await.unwrap();
        mgr.create_exploration("add retry logic".into(), ExplorationConfig::default()).await.unwrap();

        let filter = ExplorationFilter { status: None, task_contains: Some("flaky".into()) };
        let summaries = mgr.list_explorations(&filter).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].task, "fix the flaky test");
    }

    #[tokio::test]
    async fn list_explorations_sorts_by_started_at_descending() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let first = mgr.create_exploration("a".into(), ExplorationConfig::default()).await.unwrap();
        let second = mgr.create_exploration("b".into(), ExplorationConfig::default()).await.unwrap();

        mgr.update_exploration(&first.id, |mut e| {
            e.started_at = Some(chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
            e
        })
        .await
        .unwrap();
        mgr.update_exploration(&second.id, |mut e| {
            e.started_at = Some(chrono::Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap());
            e
        })
        .await
        .unwrap();

        let summaries = mgr.list_explorations(&ExplorationFilter::default()).await.unwrap();
        assert_eq!(summaries[0].id, second.id);
        assert_eq!(summaries[1].id, first.id);
    }

    #[tokio::test]
    async fn delete_exploration_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let created = mgr.create_exploration("a".into(), ExplorationConfig::default()).await.unwrap();
        mgr.delete_exploration(&created.id).await.unwrap();
        assert!(mgr.load_exploration(&created.id).await.is_err());
    }
}
