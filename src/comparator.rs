//! C9 — ResultComparator: scores and ranks the worktrees of a completed
//! exploration, producing a JSON/Markdown/table comparison report.
//! Grounded on the host crate's `context::summary` aggregation pattern,
//! generalised from a single-run analysis summary to a ranked, multi-branch
//! comparison.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{ExplorationError, Result};
use crate::model::{Decision, Exploration, Insight, WorktreeStatus};
use crate::subprocess::git::GitRunner;
use crate::subprocess::SubprocessManager;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
    pub coverage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonMetrics {
    pub worktree_index: u32,
    pub branch_name: String,
    pub status: WorktreeStatus,
    pub avg_cpu_percent: f64,
    pub avg_memory_mb: f64,
    pub uptime_seconds: i64,
    pub percentage: u8,
    pub stages_completed: usize,
    pub errors: usize,
    pub insights_published: usize,
    pub decisions_participated: usize,
    pub files_changed: Option<u32>,
    pub lines_added: Option<u32>,
    pub lines_removed: Option<u32>,
    pub test_results: Option<TestResults>,
    pub overall_score: f64,
}

fn compute_score(metrics: &ComparisonMetrics) -> f64 {
    let status_score = match metrics.status {
        WorktreeStatus::Completed => 40.0,
        WorktreeStatus::Running => 20.0,
        _ => 0.0,
    };

    let progress_score = (metrics.percentage as f64 / 100.0) * 20.0;

    let test_score = metrics
        .test_results
        .as_ref()
        .filter(|t| t.total > 0)
        .map(|t| {
            let pass_component = (t.passed as f64 / t.total as f64) * 15.0;
            let coverage_component = t.coverage_percent.unwrap_or(0.0) / 100.0 * 5.0;
            pass_component + coverage_component
        })
        .unwrap_or(0.0);

    let collaboration_score =
        (metrics.insights_published as f64 * 2.0 + metrics.decisions_participated as f64 * 3.0).min(10.0);

    let penalty = (metrics.errors as f64 * 2.0).min(10.0);

    (status_score + progress_score + test_score + collaboration_score - penalty).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub exploration_id: String,
    pub ranked: Vec<ComparisonMetrics>,
    pub winner_index: Option<u32>,
}

pub struct ResultComparator {
    git: GitRunner,
}

impl ResultComparator {
    pub fn new(subprocess: &SubprocessManager) -> Self {
        Self { git: subprocess.git() }
    }

    fn insights_for(insights: &[Insight], worktree_id: &str) -> usize {
        insights.iter().filter(|i| i.worktree_id == worktree_id).count()
    }

    fn decisions_for(decisions: &[Decision], worktree_id: &str) -> usize {
        decisions.iter().filter(|d| d.votes.contains_key(worktree_id)).count()
    }

    pub async fn compare(
        &self,
        exploration: &Exploration,
        insights: &[Insight],
        decisions: &[Decision],
        repo_path: &std::path::Path,
        merge_base: &str,
    ) -> Result<ComparisonReport> {
        let mut ranked = Vec::with_capacity(exploration.worktrees.len());

        for worktree in &exploration.worktrees {
            let worktree_id = worktree.worktree_id();

            let (files_changed, lines_added, lines_removed) = match self
                .git
                .shortstat(repo_path, merge_base, &worktree.branch_name)
                .await
            {
                Ok(stat) => (Some(stat.files_changed), Some(stat.lines_added), Some(stat.lines_removed)),
                Err(_) => (None, None, None),
            };

            let test_results = read_test_results(&worktree.worktree_path).await;

            let mut metrics = ComparisonMetrics {
                worktree_index: worktree.index,
                branch_name: worktree.branch_name.clone(),
                status: worktree.status,
                avg_cpu_percent: worktree.container_stats.as_ref().map(|s| s.cpu_percent).unwrap_or(0.0),
                avg_memory_mb: worktree.container_stats.as_ref().map(|s| s.memory_mb).unwrap_or(0.0),
                uptime_seconds: worktree.container_stats.as_ref().map(|s| s.uptime_seconds).unwrap_or(0),
                percentage: worktree.progress.percentage,
                stages_completed: worktree.progress.stages_completed.len(),
                errors: worktree.progress.errors.len(),
                insights_published: Self::insights_for(insights, &worktree_id),
                decisions_participated: Self::decisions_for(decisions, &worktree_id),
                files_changed,
                lines_added,
                lines_removed,
                test_results,
                overall_score: 0.0,
            };
            metrics.overall_score = compute_score(&metrics);
            ranked.push(metrics);
        }

        ranked.sort_by(|a, b| b.overall_score.partial_cmp(&a.overall_score).unwrap_or(std::cmp::Ordering::Equal));

        let winner_index = ranked
            .iter()
            .find(|m| m.status == WorktreeStatus::Completed)
            .map(|m| m.worktree_index);

        Ok(ComparisonReport { exploration_id: exploration.id.clone(), ranked, winner_index })
    }

    pub fn to_json(report: &ComparisonReport) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }

    pub fn to_markdown(report: &ComparisonReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Exploration {} — comparison report\n", report.exploration_id);
        let _ = writeln!(out, "| Rank | Worktree | Branch | Status | Score |");
        let _ = writeln!(out, "|-----:|---------:|--------|--------|------:|");
        for (rank, metrics) in report.ranked.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:?} | {:.1} |",
                rank + 1,
                metrics.worktree_index,
                metrics.branch_name,
                metrics.status,
                metrics.overall_score
            );
        }
        if let Some(winner) = report.winner_index {
            let _ = writeln!(out, "\nWinner: worktree-{winner}");
        }
        out
    }

    /// Fixed-width Unicode table for CLI display.
    pub fn to_table(report: &ComparisonReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "┌──────┬──────────┬────────────┬───────┐");
        let _ = writeln!(out, "│ Rank │ Worktree │ Status     │ Score │");
        let _ = writeln!(out, "├──────┼──────────┼────────────┼───────┤");
        for (rank, metrics) in report.ranked.iter().enumerate() {
            let _ = writeln!(
                out,
                "│ {:<4} │ {:<8} │ {:<10} │ {:>5.1} │",
                rank + 1,
                metrics.worktree_index,
                format!("{:?}", metrics.status),
                metrics.overall_score
            );
        }
        let _ = writeln!(out, "└──────┴──────────┴────────────┴───────┘");
        out
    }
}

/// Looks for a Jest-style `{"numPassedTests", "numFailedTests", ...}`
/// results file at well-known locations under the worktree.
async fn read_test_results(worktree_path: &str) -> Option<TestResults> {
    for candidate in ["test-results.json", "coverage/test-results.json", ".test-results.json"] {
        let path = std::path::Path::new(worktree_path).join(candidate);
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                if let Some(results) = parse_jest_style(&value) {
                    return Some(results);
                }
            }
        }
    }
    None
}

fn parse_jest_style(value: &serde_json::Value) -> Option<TestResults> {
    let passed = value.get("numPassedTests")?.as_u64()? as u32;
    let failed = value.get("numFailedTests").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let skipped = value.get("numPendingTests").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let total = value.get("numTotalTests").and_then(|v| v.as_u64()).unwrap_or((passed + failed + skipped) as u64) as u32;
    let coverage_percent = value
        .pointer("/coverageMap/total/lines/pct")
        .and_then(|v| v.as_f64());
    Some(TestResults { passed, failed, skipped, total, coverage_percent })
}

impl ComparisonMetrics {
    pub fn validation_error_if_score_out_of_range(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.overall_score) {
            return Err(ExplorationError::Internal(format!(
                "overall_score {} out of [0, 100]",
                self.overall_score
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerStats;

    fn base_metrics(status: WorktreeStatus, percentage: u8) -> ComparisonMetrics {
        ComparisonMetrics {
            worktree_index: 1,
            branch_name: "exploration/x-1".into(),
            status,
            avg_cpu_percent: 0.0,
            avg_memory_mb: 0.0,
            uptime_seconds: 0,
            percentage,
            stages_completed: 0,
            errors: 0,
            insights_published: 0,
            decisions_participated: 0,
            files_changed: None,
            lines_added: None,
            lines_removed: None,
            test_results: None,
            overall_score: 0.0,
        }
    }

    #[test]
    fn completed_with_full_progress_scores_higher_than_running() {
        let completed = {
            let mut m = base_metrics(WorktreeStatus::Completed, 100);
            m.overall_score = compute_score(&m);
            m
        };
        let running = {
            let mut m = base_metrics(WorktreeStatus::Running, 50);
            m.overall_score = compute_score(&m);
            m
        };
        assert!(completed.overall_score > running.overall_score);
        assert_eq!(completed.overall_score, 60.0);
    }

    #[test]
    fn errors_are_penalized_but_capped_at_ten() {
        let mut m = base_metrics(WorktreeStatus::Completed, 0);
        m.errors = 20;
        m.overall_score = compute_score(&m);
        assert_eq!(m.overall_score, 30.0);
    }

    #[test]
    fn collaboration_score_caps_at_ten() {
        let mut m = base_metrics(WorktreeStatus::Completed, 0);
        m.insights_published = 10;
        m.decisions_participated = 10;
        m.overall_score = compute_score(&m);
        assert_eq!(m.overall_score, 50.0);
    }

    #[test]
    fn test_score_uses_pass_rate_and_coverage() {
        let mut m = base_metrics(WorktreeStatus::Completed, 0);
        m.test_results = Some(TestResults { passed: 8, failed: 2, skipped: 0, total: 10, coverage_percent: Some(80.0) });
        m.overall_score = compute_score(&m);
        assert_eq!(m.overall_score, 40.0 + 12.0 + 4.0);
    }

    #[test]
    fn parses_jest_style_summary() {
        let value = serde_json::json!({
            "numPassedTests": 9,
            "numFailedTests": 1,
            "numPendingTests": 0,
            "numTotalTests": 10,
        });
        let results = parse_jest_style(&value).unwrap();
        assert_eq!(results.passed, 9);
        assert_eq!(results.total, 10);
    }

    #[test]
    fn score_never_exceeds_range() {
        let mut m = base_metrics(WorktreeStatus::Completed, 100);
        m.insights_published = 100;
        m.decisions_participated = 100;
        m.test_results = Some(TestResults { passed: 100, failed: 0, skipped: 0, total: 100, coverage_percent: Some(100.0) });
        m.overall_score = compute_score(&m);
        assert!(m.validation_error_if_score_out_of_range().is_ok());
        assert_eq!(m.overall_score, 100.0);
    }

    #[test]
    fn avg_memory_field_present_unused_import_guard() {
        let stats = ContainerStats { cpu_percent: 1.0, memory_mb: 2.0, uptime_seconds: 3, status: "running".into() };
        assert_eq!(stats.memory_mb, 2.0);
    }
}
