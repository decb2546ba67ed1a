//! C6 — CollaborationCoordinator: publish/query insights, propose/vote on
//! decisions, all mediated through `FileLockManager` so concurrent
//! worktree workers never clobber each other's writes. Grounded on the host
//! crate's session event aggregation (`session::events`) generalised from a
//! single append log to the two shared pools the task calls for.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, ExplorationEvent};
use crate::lock::FileLockManager;
use crate::model::{Decision, DecisionOption, DecisionsPool, Insight, InsightType, InsightsPool};

pub struct CollaborationStats {
    pub total_insights: u64,
    pub total_decisions: u64,
    pub decisions_pending: u64,
    pub decisions_resolved: u64,
    pub insights_by_type: Vec<(InsightType, usize)>,
    pub insights_by_worktree: HashMap<String, usize>,
    pub distinct_publishers: usize,
}

pub struct CollaborationCoordinator {
    exploration_id: String,
    insights_path: PathBuf,
    decisions_path: PathBuf,
    locks: FileLockManager,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl CollaborationCoordinator {
    pub fn new(
        exploration_id: &str,
        shared_root: &Path,
        locks: FileLockManager,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            exploration_id: exploration_id.to_string(),
            insights_path: shared_root.join("insights-pool.json"),
            decisions_path: shared_root.join("decisions-pool.json"),
            locks,
            clock,
            events,
        }
    }

    pub async fn publish_insight(
        &self,
        worktree_id: &str,
        kind: InsightType,
        title: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<Insight> {
        let insight = Insight {
            id: format!("insight-{}", uuid::Uuid::new_v4()),
            worktree_id: worktree_id.to_string(),
            kind,
            title: title.to_string(),
            content: content.to_string(),
            tags,
            metadata: Default::default(),
            timestamp: self.clock.now(),
        };

        let published = insight.clone();
        self.locks
            .update_with_lock(&self.insights_path, move |mut pool: InsightsPool| {
                pool.insights.push(published.clone());
                pool.total_count += 1;
                pool.last_updated = published.timestamp;
                pool
            })
            .await?;

        self.events
            .emit(ExplorationEvent::InsightPublished {
                exploration_id: self.exploration_id.clone(),
                worktree_id: insight.worktree_id.clone(),
                title: insight.title.clone(),
            })
            .await;

        Ok(insight)
    }

    async fn load_insights(&self) -> Result<InsightsPool> {
        self.locks.read_with_lock(&self.insights_path).await
    }

    pub async fn insights_by_type(&self, kind: InsightType) -> Result<Vec<Insight>> {
        let pool = self.load_insights().await?;
        Ok(pool.insights.into_iter().filter(|i| i.kind == kind).collect())
    }

    /// Matches insights carrying any of `tags` (any-of semantics).
    pub async fn insights_by_tags(&self, tags: &[String]) -> Result<Vec<Insight>> {
        let pool = self.load_insights().await?;
        Ok(pool
            .insights
            .into_iter()
            .filter(|i| i.tags.iter().any(|t| tags.contains(t)))
            .collect())
    }

    pub async fn insights_from_other_worktrees(&self, worktree_id: &str) -> Result<Vec<Insight>> {
        let pool = self.load_insights().await?;
        Ok(pool
            .insights
            .into_iter()
            .filter(|i| i.worktree_id != worktree_id)
            .collect())
    }

    pub async fn recent_insights(&self, limit: usize) -> Result<Vec<Insight>> {
        let mut pool = self.load_insights().await?;
        pool.insights.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        pool.insights.truncate(limit);
        Ok(pool.insights)
    }

    pub async fn search_insights(&self, keyword: &str) -> Result<Vec<Insight>> {
        let needle = keyword.to_lowercase();
        let pool = self.load_insights().await?;
        Ok(pool
            .insights
            .into_iter()
            .filter(|i| {
                i.title.to_lowercase().contains(&needle) || i.content.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn propose_decision(
        &self,
        topic: &str,
        rationale: Option<String>,
        options: Vec<DecisionOption>,
    ) -> Result<Decision> {
        let decision = Decision {
            id: format!("decision-{}", uuid::Uuid::new_v4()),
            topic: topic.to_string(),
            rationale,
            options,
            votes: Default::default(),
            chosen_option: None,
            timestamp: self.clock.now(),
        };

        let proposed = decision.clone();
        self.locks
            .update_with_lock(&self.decisions_path, move |mut pool: DecisionsPool| {
                pool.decisions.push(proposed.clone());
                pool.total_count += 1;
                pool.last_updated = proposed.timestamp;
                pool
            })
            .await?;

        Ok(decision)
    }

    /// Records `voter_id`'s vote for `option_index` on `decision_id` and
    /// returns the decision's state after the vote.
    pub async fn vote_on_decision(
        &self,
        decision_id: &str,
        voter_id: &str,
        option_index: u32,
    ) -> Result<Decision> {
        let decision_id = decision_id.to_string();
        let voter_id = voter_id.to_string();
        let lookup_id = decision_id.clone();

        let pool = self
            .locks
            .update_with_lock(&self.decisions_path, move |mut pool: DecisionsPool| {
                if let Some(decision) = pool.decisions.iter_mut().find(|d| d.id == lookup_id) {
                    decision.record_vote(&voter_id, option_index);
                }
                pool
            })
            .await?;

        let decision = pool
            .decisions
            .into_iter()
            .find(|d| d.id == decision_id)
            .ok_or_else(|| crate::error::ExplorationError::NotFound(decision_id.clone()))?;

        if let Some(chosen_option) = decision.chosen_option {
            self.events
                .emit(ExplorationEvent::DecisionResolved {
                    exploration_id: self.exploration_id.clone(),
                    decision_id: decision.id.clone(),
                    chosen_option,
                })
                .await;
        }

        Ok(decision)
    }

    async fn load_decisions(&self) -> Result<DecisionsPool> {
        self.locks.read_with_lock(&self.decisions_path).await
    }

    pub async fn pending_decisions(&self) -> Result<Vec<Decision>> {
        let pool = self.load_decisions().await?;
        Ok(pool.decisions.into_iter().filter(|d| d.chosen_option.is_none()).collect())
    }

    pub async fn resolved_decisions(&self) -> Result<Vec<Decision>> {
        let pool = self.load_decisions().await?;
        Ok(pool.decisions.into_iter().filter(|d| d.chosen_option.is_some()).collect())
    }

    pub async fn get_decision(&self, decision_id: &str) -> Result<Option<Decision>> {
        let pool = self.load_decisions().await?;
        Ok(pool.decisions.into_iter().find(|d| d.id == decision_id))
    }

    pub async fn stats(&self) -> Result<CollaborationStats> {
        let insights = self.load_insights().await?;
        let decisions = self.load_decisions().await?;

        let mut by_type: Vec<(InsightType, usize)> = Vec::new();
        for kind in [
            InsightType::Finding,
            InsightType::Warning,
            InsightType::DecisionNote,
            InsightType::Progress,
            InsightType::Other,
        ] {
            let count = insights.insights.iter().filter(|i| i.kind == kind).count();
            by_type.push((kind, count));
        }

        let mut by_worktree: HashMap<String, usize> = HashMap::new();
        for insight in &insights.insights {
            *by_worktree.entry(insight.worktree_id.clone()).or_insert(0) += 1;
        }

        let mut publishers: HashSet<&str> = HashSet::new();
        for insight in &insights.insights {
            publishers.insert(&insight.worktree_id);
        }
        for decision in &decisions.decisions {
            for voter in decision.votes.keys() {
                publishers.insert(voter);
            }
        }

        Ok(CollaborationStats {
            total_insights: insights.total_count,
            total_decisions: decisions.total_count,
            decisions_pending: decisions.decisions.iter().filter(|d| d.chosen_option.is_none()).count() as u64,
            decisions_resolved: decisions.decisions.iter().filter(|d| d.chosen_option.is_some()).count() as u64,
            insights_by_type: by_type,
            insights_by_worktree: by_worktree,
            distinct_publishers: publishers.len(),
        })
    }

    /// JSON snapshot of both pools (supplemented export feature).
    pub async fn export_json(&self) -> Result<serde_json::Value> {
        let insights = self.load_insights().await?;
        let decisions = self.load_decisions().await?;
        Ok(serde_json::json!({
            "insights": insights,
            "decisions": decisions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    async fn fresh_coordinator() -> (tempfile::TempDir, CollaborationCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(SystemClock);
        let locks = FileLockManager::new(clock.clone());
        let events = Arc::new(EventBus::new());
        let now = chrono::Utc::now();
        tokio::fs::write(
            dir.path().join("insights-pool.json"),
            serde_json::to_vec(&InsightsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("decisions-pool.json"),
            serde_json::to_vec(&DecisionsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();
        let coord = CollaborationCoordinator::new("exp-1", dir.path(), locks, clock, events);
        (dir, coord)
    }

    #[tokio::test]
    async fn publish_and_query_by_type() {
        let (_dir, coord) = fresh_coordinator().await;
        coord
            .publish_insight("worktree-1", InsightType::Warning, "slow test", "flaky", vec!["ci".into()])
            .await
            .unwrap();
        coord
            .publish_insight("worktree-1", InsightType::Finding, "root cause", "it's the cache", vec![])
            .await
            .unwrap();

        let warnings = coord.insights_by_type(InsightType::Warning).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].title, "slow test");
    }

    #[tokio::test]
    async fn filters_insights_from_other_worktrees() {
        let (_dir, coord) = fresh_coordinator().await;
        coord
            .publish_insight("worktree-1", InsightType::Finding, "a", "a", vec![])
            .await
            .unwrap();
        coord
            .publish_insight("worktree-2", InsightType::Finding, "b", "b", vec![])
            .await
            .unwrap();

        let others = coord.insights_from_other_worktrees("worktree-1").await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].worktree_id, "worktree-2");
    }

    #[tokio::test]
    async fn keyword_search_matches_title_or_content() {
        let (_dir, coord) = fresh_coordinator().await;
        coord
            .publish_insight("worktree-1", InsightType::Finding, "memory leak", "in the parser", vec![])
            .await
            .unwrap();

        assert_eq!(coord.search_insights("leak").await.unwrap().len(), 1);
        assert_eq!(coord.search_insights("parser").await.unwrap().len(), 1);
        assert_eq!(coord.search_insights("nonexistent").await.unwrap().len(), 0);
    }

    struct RecordingObserver {
        events: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl crate::events::EventObserver for RecordingObserver {
        async fn on_event(&self, event: &ExplorationEvent) {
            self.events.lock().await.push(event.to_string());
        }
    }

    #[tokio::test]
    async fn publish_insight_emits_insight_published_event() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(SystemClock);
        let locks = FileLockManager::new(clock.clone());
        let events = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingObserver { events: tokio::sync::Mutex::new(Vec::new()) });
        events.register(recorder.clone()).await;

        let now = chrono::Utc::now();
        tokio::fs::write(
            dir.path().join("insights-pool.json"),
            serde_json::to_vec(&InsightsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("decisions-pool.json"),
            serde_json::to_vec(&DecisionsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();

        let coord = CollaborationCoordinator::new("exp-1", dir.path(), locks, clock, events);
        coord
            .publish_insight("worktree-1", InsightType::Finding, "root cause", "it's the cache", vec![])
            .await
            .unwrap();

        let recorded = recorder.events.lock().await;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains("insight from worktree-1"));
    }

    #[tokio::test]
    async fn vote_that_resolves_a_decision_emits_decision_resolved_event() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(SystemClock);
        let locks = FileLockManager::new(clock.clone());
        let events = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingObserver { events: tokio::sync::Mutex::new(Vec::new()) });
        events.register(recorder.clone()).await;

        let now = chrono::Utc::now();
        tokio::fs::write(
            dir.path().join("insights-pool.json"),
            serde_json::to_vec(&InsightsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("decisions-pool.json"),
            serde_json::to_vec(&DecisionsPool::empty("exp-1", now)).unwrap(),
        )
        .await
        .unwrap();

        let coord = CollaborationCoordinator::new("exp-1", dir.path(), locks, clock, events);
        let decision = coord
            .propose_decision(
                "which cache backend",
                None,
                vec![
                    DecisionOption { index: 0, label: "redis".into(), description: None, pros: vec![], cons: vec![] },
                    DecisionOption { index: 1, label: "in-memory".into(), description: None, pros: vec![], cons: vec![] },
                ],
            )
            .await
            .unwrap();

        // A single vote already forms a majority of one, so the decision
        // resolves (and the event fires) immediately.
        coord.vote_on_decision(&decision.id, "worktree-1", 0).await.unwrap();

        let recorded = recorder.events.lock().await;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains("decision") && recorded[0].contains("resolved to option 0"));
    }

    #[tokio::test]
    async fn propose_and_vote_resolves_decision() {
        let (_dir, coord) = fresh_coordinator().await;
        let decision = coord
            .propose_decision(
                "which cache backend",
                None,
                vec![
                    DecisionOption { index: 0, label: "redis".into(), description: None, pros: vec![], cons: vec![] },
                    DecisionOption { index: 1, label: "in-memory".into(), description: None, pros: vec![], cons: vec![] },
                ],
            )
            .await
            .unwrap();

        coord.vote_on_decision(&decision.id, "worktree-1", 0).await.unwrap();
        let resolved = coord.vote_on_decision(&decision.id, "worktree-2", 0).await.unwrap();
        assert_eq!(resolved.chosen_option, Some(0));

        let pending = coord.pending_decisions().await.unwrap();
        assert!(pending.is_empty());
        let resolved_list = coord.resolved_decisions().await.unwrap();
        assert_eq!(resolved_list.len(), 1);
    }

    #[tokio::test]
    async fn stats_count_insights_and_decisions() {
        let (_dir, coord) = fresh_coordinator().await;
        coord
            .publish_insight("worktree-1", InsightType::Progress, "50%", "halfway", vec![])
            .await
            .unwrap();
        coord.propose_decision("topic", None, vec![]).await.unwrap();

        let stats = coord.stats().await.unwrap();
        assert_eq!(stats.total_insights, 1);
        assert_eq!(stats.total_decisions, 1);
        assert_eq!(stats.decisions_resolved, 0);
    }
}
