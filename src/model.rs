//! On-disk data model. Every persistent entity here is a plain
//! `serde`-derived struct written as JSON under the explorations directory;
//! readers tolerate unknown fields (`#[serde(default)]` on anything added
//! after the fact) so the schema can grow without breaking old documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle states an exploration can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStatus {
    Pending,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl ExplorationStatus {
    /// Whether `self -> next` is a legal FSM transition.
    pub fn can_transition_to(self, next: ExplorationStatus) -> bool {
        use ExplorationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
                | (Stopped, Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExplorationStatus::Completed | ExplorationStatus::Failed)
    }
}

impl Default for ExplorationStatus {
    fn default() -> Self {
        ExplorationStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl WorktreeStatus {
    pub fn can_transition_to(self, next: WorktreeStatus) -> bool {
        use WorktreeStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Parallel
    }
}

fn default_docker_image() -> String {
    "prodigy/explorer:latest".to_string()
}

fn default_timeout_minutes() -> f64 {
    30.0
}

/// Config keys recognised by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    pub branches: u32,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: f64,
    #[serde(default)]
    pub no_cleanup: bool,
}

fn default_cpu_limit() -> String {
    "1".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            branches: 1,
            mode: ExecutionMode::Parallel,
            strategies: None,
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
            docker_image: default_docker_image(),
            timeout_minutes: default_timeout_minutes(),
            no_cleanup: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub uptime_seconds: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub percentage: u8,
    #[serde(default)]
    pub stages_completed: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub insights_published: u32,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedResources {
    pub container_name: String,
    pub port: Option<u16>,
    pub cpu_limit: String,
    pub memory_limit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeExploration {
    pub index: u32,
    pub branch_name: String,
    pub worktree_path: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub allocated_resources: Option<AllocatedResources>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_stats: Option<ContainerStats>,
    pub status: WorktreeStatus,
    #[serde(default)]
    pub progress: Progress,
}

impl WorktreeExploration {
    pub fn new(index: u32, branch_name: String, worktree_path: String) -> Self {
        Self {
            index,
            branch_name,
            worktree_path,
            strategy: None,
            allocated_resources: None,
            container_id: None,
            container_stats: None,
            status: WorktreeStatus::Pending,
            progress: Progress::default(),
        }
    }

    pub fn worktree_id(&self) -> String {
        format!("worktree-{}", self.index)
    }

    /// Validates and applies a transition, rejecting illegal ones.
    pub fn transition_to(&mut self, next: WorktreeStatus) -> Result<(), (WorktreeStatus, WorktreeStatus)> {
        if self.status == next {
            return Ok(());
        }
        if self.status.can_transition_to(next) {
            self.status = next;
            Ok(())
        } else {
            Err((self.status, next))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeMetadata {
    pub merged_at: DateTime<Utc>,
    pub merged_worktree: u32,
    pub merge_target_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationResults {
    pub mode: ExecutionMode,
    pub completed_branches: u32,
    pub total_branches: u32,
    pub success: bool,
    pub winner_index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exploration {
    pub id: String,
    pub task: String,
    pub mode: ExecutionMode,
    pub branch_count: u32,
    pub config: ExplorationConfig,
    pub status: ExplorationStatus,
    /// The branch every worktree was forked from, captured once at the
    /// start of the run so later code (the comparator's `git diff`
    /// base, a resumed run) doesn't have to guess it from worktree state.
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub completed_branches: u32,
    #[serde(default)]
    pub worktrees: Vec<WorktreeExploration>,
    #[serde(default)]
    pub results: Option<ExplorationResults>,
    #[serde(default)]
    pub merge: Option<MergeMetadata>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Default for Exploration {
    /// Placeholder used only as the fallback for `FileLockManager`'s
    /// read-if-absent path; callers resolve a missing exploration to
    /// `ExplorationError::NotFound` before this is ever observed.
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            task: String::new(),
            mode: ExecutionMode::default(),
            branch_count: 0,
            config: ExplorationConfig::default(),
            status: ExplorationStatus::default(),
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
        }
    }
}

impl Exploration {
    /// Invariant: completed_branches <= N.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.completed_branches > self.branch_count {
            return Err(format!(
                "completed_branches ({}) exceeds branch_count ({})",
                self.completed_branches, self.branch_count
            ));
        }
        Ok(())
    }

    pub fn transition_to(
        &mut self,
        next: ExplorationStatus,
    ) -> Result<(), (ExplorationStatus, ExplorationStatus)> {
        if self.status == next {
            return Ok(());
        }
        if self.status.can_transition_to(next) {
            self.status = next;
            Ok(())
        } else {
            Err((self.status, next))
        }
    }

    pub fn worktree_mut(&mut self, index: u32) -> Option<&mut WorktreeExploration> {
        self.worktrees.iter_mut().find(|w| w.index == index)
    }

    pub fn worktree(&self, index: u32) -> Option<&WorktreeExploration> {
        self.worktrees.iter().find(|w| w.index == index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationSummary {
    pub id: String,
    pub task: String,
    pub status: ExplorationStatus,
    pub branch_count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// Insight / Decision collaboration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Finding,
    Warning,
    DecisionNote,
    Progress,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub worktree_id: String,
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    pub index: u32,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub rationale: Option<String>,
    pub options: Vec<DecisionOption>,
    #[serde(default)]
    pub votes: HashMap<String, u32>,
    #[serde(default)]
    pub chosen_option: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Records a voter's choice (last wins), then recomputes the winner.
    /// Sticky: once `chosen_option` is set it is never revisited, even if a
    /// later vote would flip the majority.
    pub fn record_vote(&mut self, voter_id: &str, option_index: u32) {
        self.votes.insert(voter_id.to_string(), option_index);

        if self.chosen_option.is_some() {
            return;
        }

        let total_votes = self.votes.len() as u32;
        if total_votes == 0 {
            return;
        }
        let majority = total_votes.div_ceil(2);

        for option in &self.options {
            let count = self
                .votes
                .values()
                .filter(|&&v| v == option.index)
                .count() as u32;
            if count >= majority {
                self.chosen_option = Some(option.index);
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsPool {
    pub exploration_id: String,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub total_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl InsightsPool {
    pub fn empty(exploration_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            exploration_id: exploration_id.to_string(),
            insights: Vec::new(),
            total_count: 0,
            last_updated: now,
        }
    }
}

impl Default for InsightsPool {
    fn default() -> Self {
        Self::empty("", Utc::now())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionsPool {
    pub exploration_id: String,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub total_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for DecisionsPool {
    fn default() -> Self {
        Self::empty("", Utc::now())
    }
}

impl DecisionsPool {
    pub fn empty(exploration_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            exploration_id: exploration_id.to_string(),
            decisions: Vec::new(),
            total_count: 0,
            last_updated: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_fsm_rejects_illegal_transition() {
        let mut wt = WorktreeExploration::new(1, "exploration/x-1".into(), "/tmp/x".into());
        assert!(wt.transition_to(WorktreeStatus::Completed).is_err());
        assert!(wt.transition_to(WorktreeStatus::Running).is_ok());
        assert!(wt.transition_to(WorktreeStatus::Completed).is_ok());
    }

    #[test]
    fn decision_zero_votes_has_no_chosen_option() {
        let mut d = Decision {
            id: "d1".into(),
            topic: "t".into(),
            rationale: None,
            options: vec![
                DecisionOption {
                    index: 0,
                    label: "a".into(),
                    description: None,
                    pros: vec![],
                    cons: vec![],
                },
                DecisionOption {
                    index: 1,
                    label: "b".into(),
                    description: None,
                    pros: vec![],
                    cons: vec![],
                },
            ],
            votes: HashMap::new(),
            chosen_option: None,
            timestamp: Utc::now(),
        };
        assert_eq!(d.chosen_option, None);

        d.record_vote("worktree-1", 0);
        assert_eq!(d.chosen_option, Some(0));
    }

    #[test]
    fn decision_resolution_sticky_across_three_votes() {
        let mut d = Decision {
            id: "d1".into(),
            topic: "t".into(),
            rationale: None,
            options: vec![
                DecisionOption {
                    index: 0,
                    label: "a".into(),
                    description: None,
                    pros: vec![],
                    cons: vec![],
                },
                DecisionOption {
                    index: 1,
                    label: "b".into(),
                    description: None,
                    pros: vec![],
                    cons: vec![],
                },
            ],
            votes: HashMap::new(),
            chosen_option: None,
            timestamp: Utc::now(),
        };
        d.record_vote("worktree-1", 0);
        d.record_vote("worktree-2", 1);
        assert_eq!(d.chosen_option, None);
        d.record_vote("worktree-3", 0);
        assert_eq!(d.chosen_option, Some(0));

        // Sticky: a later vote that would flip the majority doesn't.
        d.record_vote("worktree-1", 1);
        d.record_vote("worktree-3", 1);
        assert_eq!(d.chosen_option, Some(0));
    }

    #[test]
    fn vote_idempotent_last_writer_wins() {
        let mut d = Decision {
            id: "d1".into(),
            topic: "t".into(),
            rationale: None,
            options: vec![DecisionOption {
                index: 0,
                label: "a".into(),
                description: None,
                pros: vec![],
                cons: vec![],
            }],
            votes: HashMap::new(),
            chosen_option: None,
            timestamp: Utc::now(),
        };
        d.record_vote("w1", 0);
        d.record_vote("w1", 0);
        d.record_vote("w1", 0);
        assert_eq!(d.votes.len(), 1);
        assert_eq!(d.votes.get("w1"), Some(&0));
    }
}
