//! C11 — ExplorationOrchestrator: the top-level driver that turns a task and
//! a branch count into a finished, scored exploration. Grounded on the host
//! crate's `cook::orchestrator` (pre-flight checks, a numbered lifecycle
//! drive, and a `cleanup` that tears down everything it started),
//! generalised from a single cook run to a multi-worktree exploration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::System;

use crate::clock::Clock;
use crate::collaboration::CollaborationCoordinator;
use crate::comparator::{ComparisonReport, ResultComparator};
use crate::container::ContainerManager;
use crate::error::{ExplorationError, Result};
use crate::events::{EventBus, ExplorationEvent, TracingObserver};
use crate::lock::FileLockManager;
use crate::model::{Exploration, ExplorationConfig, ExplorationStatus, ExplorationSummary};
use crate::resource::ResourceAllocator;
use crate::shared_volume::SharedVolumeManager;
use crate::state::ExplorationStateManager;
use crate::strategy::strategy_for_mode;
use crate::subprocess::SubprocessManager;
use crate::worktree::WorktreeManager;

const MIN_DOCKER_MAJOR: u32 = 20;
const MIN_DOCKER_MINOR: u32 = 10;
const MEMORY_HEADROOM_FACTOR: f64 = 1.2;
const MIN_FREE_DISK_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Pre-flight checks run before any worktree or container is created, so a
/// doomed exploration fails fast with an actionable message instead of half
/// way through resource allocation.
pub struct SafetyValidator {
    worktrees: WorktreeManager,
    subprocess: SubprocessManager,
}

impl SafetyValidator {
    pub fn new(repo_path: PathBuf, subprocess: &SubprocessManager) -> Self {
        Self {
            worktrees: WorktreeManager::new(repo_path, subprocess),
            subprocess: subprocess.clone(),
        }
    }

    pub async fn validate(&self, config: &ExplorationConfig) -> Result<()> {
        if !self.worktrees.is_repo_clean().await? {
            return Err(ExplorationError::Safety(
                "repository has uncommitted changes".into(),
            ));
        }

        self.validate_docker_version().await?;
        self.validate_system_resources(config)?;

        if config.branches == 0 {
            return Err(ExplorationError::Validation("branches must be >= 1".into()));
        }

        Ok(())
    }

    async fn validate_docker_version(&self) -> Result<()> {
        let version = self
            .subprocess
            .docker()
            .version()
            .await
            .map_err(|e| ExplorationError::Safety(format!("docker not available: {e}")))?;

        let (major, minor) = parse_docker_version(&version)
            .ok_or_else(|| ExplorationError::Safety(format!("could not parse docker version: {version}")))?;

        if (major, minor) < (MIN_DOCKER_MAJOR, MIN_DOCKER_MINOR) {
            return Err(ExplorationError::Safety(format!(
                "docker {major}.{minor} is older than required {MIN_DOCKER_MAJOR}.{MIN_DOCKER_MINOR}"
            )));
        }
        Ok(())
    }

    fn validate_system_resources(&self, config: &ExplorationConfig) -> Result<()> {
        let mut system = System::new_all();
        system.refresh_all();

        let cpu_cores = system.cpus().len() as u32;
        if cpu_cores < config.branches {
            return Err(ExplorationError::Safety(format!(
                "{cpu_cores} CPU cores available, {} branches requested",
                config.branches
            )));
        }

        let per_branch_bytes = ResourceAllocator::validate_memory_limit(&config.memory_limit)
            .map(|_| parse_memory_limit_bytes(&config.memory_limit))
            .unwrap_or(2 * 1024 * 1024 * 1024);
        let required_bytes =
            (per_branch_bytes as f64 * config.branches as f64 * MEMORY_HEADROOM_FACTOR) as u64;
        let available_bytes = system.available_memory();
        if available_bytes < required_bytes {
            return Err(ExplorationError::Safety(format!(
                "{available_bytes} bytes of memory available, {required_bytes} required"
            )));
        }

        Ok(())
    }

    fn validate_disk_space(&self, path: &Path) -> Result<()> {
        let available = fs4::available_space(path)
            .map_err(|e| ExplorationError::Safety(format!("could not read free disk space: {e}")))?;
        if available < MIN_FREE_DISK_BYTES {
            return Err(ExplorationError::Safety(format!(
                "{available} bytes free, {MIN_FREE_DISK_BYTES} required"
            )));
        }
        Ok(())
    }
}

fn parse_docker_version(raw: &str) -> Option<(u32, u32)> {
    let after_prefix = raw.strip_prefix("Docker version ")?;
    let version_part = after_prefix.split(',').next()?;
    let mut parts = version_part.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn parse_memory_limit_bytes(memory_limit: &str) -> u64 {
    let lower = memory_limit.to_ascii_lowercase();
    let digits: String = lower.chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u64 = digits.parse().unwrap_or(512);
    if lower.ends_with('g') {
        value * 1024 * 1024 * 1024
    } else {
        value * 1024 * 1024
    }
}

/// Top-level driver for one exploration's full lifecycle.
pub struct ExplorationOrchestrator {
    repo_path: PathBuf,
    state: Arc<ExplorationStateManager>,
    subprocess: SubprocessManager,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl ExplorationOrchestrator {
    pub async fn new(
        repo_path: PathBuf,
        explorations_root: PathBuf,
        subprocess: SubprocessManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = FileLockManager::new(clock.clone());
        let state = Arc::new(ExplorationStateManager::new(explorations_root, locks, clock.clone()));
        let events = Arc::new(EventBus::new());
        events.register(Arc::new(TracingObserver)).await;

        Self { repo_path, state, subprocess, clock, events }
    }

    /// Runs the full exploration lifecycle: validate, create worktrees,
    /// initialize the shared volume, run the configured strategy, score the
    /// results, and clean up unless `no_cleanup` was requested.
    pub async fn run_exploration(&self, task: String, config: ExplorationConfig) -> Result<Exploration> {
        // 1. Pre-flight safety checks.
        let safety = SafetyValidator::new(self.repo_path.clone(), &self.subprocess);
        safety.validate(&config).await?;
        safety.validate_disk_space(&self.repo_path)?;

        // 2. Create the exploration record.
        let exploration = self.state.create_exploration(task, config.clone()).await?;
        self.events
            .emit(ExplorationEvent::Started { exploration_id: exploration.id.clone(), at: self.clock.now() })
            .await;

        // 3. Wire up the per-run managers.
        let worktrees = Arc::new(WorktreeManager::new(self.repo_path.clone(), &self.subprocess));
        let containers = Arc::new(ContainerManager::new(&self.subprocess, self.clock.clone()));
        let resources = Arc::new(ResourceAllocator::with_default_range());
        let shared_root = self.state.shared_dir(&exploration.id);
        let shared = Arc::new(SharedVolumeManager::new(shared_root, exploration.id.clone()));

        // 4. Pull the configured image before any branch needs it.
        containers.pull_if_absent(&config.docker_image).await?;

        // 5. Build the execution context and dispatch to the right strategy.
        let ctx = crate::strategy::ExecutionContext {
            exploration_id: exploration.id.clone(),
            repo_path: self.repo_path.clone(),
            state: self.state.clone(),
            worktrees,
            containers,
            resources,
            shared,
            subprocess: self.subprocess.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
            config: config.clone(),
        };
        let strategy = strategy_for_mode(config.mode);

        // 6. Drive the strategy to completion.
        let mut finished = strategy.execute(&ctx, exploration).await?;

        // 7. Score and rank the worktrees. The comparator's top completed
        //    entry is authoritative for `winner_index`, overriding whatever
        //    the execution strategy guessed while it was still running.
        let comparator = ResultComparator::new(&self.subprocess);
        let insights_pool = self.state.load_insights_pool(&finished.id).await.ok();
        let decisions_pool = self.state.load_decisions_pool(&finished.id).await.ok();
        let merge_base = ctx_base_branch(&finished);
        let report = comparator
            .compare(
                &finished,
                &insights_pool.map(|p| p.insights).unwrap_or_default(),
                &decisions_pool.map(|p| p.decisions).unwrap_or_default(),
                &self.repo_path,
                &merge_base,
            )
            .await
            .ok();
        if let Some(report) = &report {
            self.persist_comparison_report(&finished.id, report).await?;
            if let Some(results) = finished.results.as_mut() {
                results.winner_index = report.winner_index;
            }
            self.state.save_exploration(&finished).await?;
        }

        // 8. Publish a final insight summarizing collaboration activity.
        if !finished.config.no_cleanup {
            self.cleanup(&finished.id, &ctx).await?;
        }

        Ok(finished)
    }

    async fn persist_comparison_report(&self, exploration_id: &str, report: &ComparisonReport) -> Result<()> {
        let json_path = self.state.path_for(exploration_id, "comparison-report.json");
        let json = ResultComparator::to_json(report)?;
        tokio::fs::write(&json_path, json).await?;

        let md_path = self.state.path_for(exploration_id, "comparison-report.md");
        tokio::fs::write(&md_path, ResultComparator::to_markdown(report)).await?;

        Ok(())
    }

    /// Resumes a `Pending` or `Stopped` exploration from where it left off.
    pub async fn resume_exploration(&self, exploration_id: &str) -> Result<Exploration> {
        let exploration = self.state.load_exploration(exploration_id).await?;
        if !matches!(exploration.status, ExplorationStatus::Pending | ExplorationStatus::Stopped) {
            return Err(ExplorationError::IllegalTransition {
                from: format!("{:?}", exploration.status),
                to: "running".into(),
            });
        }

        let worktrees = Arc::new(WorktreeManager::new(self.repo_path.clone(), &self.subprocess));
        let containers = Arc::new(ContainerManager::new(&self.subprocess, self.clock.clone()));
        let resources = Arc::new(ResourceAllocator::with_default_range());
        let shared_root = self.state.shared_dir(exploration_id);
        let shared = Arc::new(SharedVolumeManager::new(shared_root, exploration_id.to_string()));

        let ctx = crate::strategy::ExecutionContext {
            exploration_id: exploration_id.to_string(),
            repo_path: self.repo_path.clone(),
            state: self.state.clone(),
            worktrees,
            containers,
            resources,
            shared,
            subprocess: self.subprocess.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
            config: exploration.config.clone(),
        };
        let strategy = strategy_for_mode(exploration.config.mode);
        strategy.execute(&ctx, exploration).await
    }

    /// Stops a running exploration: every container is stopped but left in
    /// place, and the exploration transitions to `Stopped` so it can be
    /// resumed later.
    pub async fn stop_exploration(&self, exploration_id: &str) -> Result<Exploration> {
        let containers = ContainerManager::new(&self.subprocess, self.clock.clone());
        self.state
            .update_exploration(exploration_id, |mut exploration| {
                if exploration.status != ExplorationStatus::Running {
                    return exploration;
                }
                let _ = exploration.transition_to(ExplorationStatus::Stopped);
                exploration
            })
            .await?;

        let exploration = self.state.load_exploration(exploration_id).await?;
        for worktree in &exploration.worktrees {
            if let Some(resources) = &worktree.allocated_resources {
                let _ = containers.stop(&resources.container_name, 10).await;
            }
        }
        Ok(exploration)
    }

    pub async fn get_exploration_status(&self, exploration_id: &str) -> Result<Exploration> {
        self.state.load_exploration(exploration_id).await
    }

    pub async fn list_explorations(
        &self,
        status: Option<ExplorationStatus>,
        task_contains: Option<String>,
    ) -> Result<Vec<ExplorationSummary>> {
        self.state
            .list_explorations(&crate::state::ExplorationFilter { status, task_contains })
            .await
    }

    /// Tears down every container and worktree for an exploration, releases
    /// its resources, and (unless `no_cleanup`) removes its on-disk state.
    pub async fn cleanup(&self, exploration_id: &str, ctx: &crate::strategy::ExecutionContext) -> Result<()> {
        let exploration = self.state.load_exploration(exploration_id).await?;

        for worktree in &exploration.worktrees {
            if let Some(resources) = &worktree.allocated_resources {
                let _ = ctx.containers.stop(&resources.container_name, 10).await;
                let _ = ctx.containers.remove(&resources.container_name, true).await;
            }
            let path = std::path::PathBuf::from(&worktree.worktree_path);
            let _ = ctx.worktrees.remove_worktree(&path, true).await;
            let _ = ctx.worktrees.delete_branch(&worktree.branch_name, true).await;
        }

        ctx.resources.release_all(exploration_id).await;
        Ok(())
    }

    pub fn collaboration_for(&self, exploration_id: &str, locks: FileLockManager) -> CollaborationCoordinator {
        CollaborationCoordinator::new(
            exploration_id,
            &self.state.shared_dir(exploration_id),
            locks,
            self.clock.clone(),
            self.events.clone(),
        )
    }
}

/// The branch every worktree forked from, captured once by the strategy at
/// the start of the run. Falls back to `"main"` only for exploration
/// records persisted before this field existed.
fn ctx_base_branch(exploration: &Exploration) -> String {
    if exploration.base_branch.is_empty() {
        "main".to_string()
    } else {
        exploration.base_branch.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_docker_version_string() {
        let (major, minor) = parse_docker_version("Docker version 24.0.7, build afdd53b").unwrap();
        assert_eq!((major, minor), (24, 0));
    }

    #[test]
    fn rejects_unparseable_docker_version_string() {
        assert!(parse_docker_version("not docker").is_none());
    }

    #[test]
    fn parses_gigabyte_and_megabyte_memory_limits() {
        assert_eq!(parse_memory_limit_bytes("2g"), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit_bytes("512m"), 512 * 1024 * 1024);
    }
}
