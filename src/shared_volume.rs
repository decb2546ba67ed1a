//! C4 — SharedVolumeManager: initialises and validates the per-exploration
//! shared directory tree. Grounded on the host crate's
//! checkpoint storage layer (`cook::execution::mapreduce::checkpoint::storage`)
//! for the compress/archive pattern, adapted to tar.gz over a directory
//! instead of a single checkpoint file.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{ExplorationError, Result};
use crate::model::{DecisionsPool, InsightsPool};

const README_TEMPLATE: &str = "\
# Shared exploration volume

This directory is mounted read-write into every worker container at
`/shared`. Workers publish insights and decisions through the files here,
always via the advisory file lock protocol (`<file>.lock` siblings) — never
write these files directly without going through `FileLockManager`.

- `insights-pool.json` / `decisions-pool.json` — append-only collaboration
  pools, shared across all worktrees.
- `worktree-<i>/` — per-worker scratch state: `latest-insight.json`,
  `metrics.json`, `progress.json`.
";

pub struct ValidationReport {
    pub valid: bool,
    pub missing_files: Vec<String>,
    pub errors: Vec<String>,
}

pub struct SharedVolumeManager {
    root: PathBuf,
    exploration_id: String,
}

impl SharedVolumeManager {
    pub fn new(root: PathBuf, exploration_id: String) -> Self {
        Self { root, exploration_id }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worktree_dir(&self, index: u32) -> PathBuf {
        self.root.join(format!("worktree-{index}"))
    }

    pub fn insights_pool_path(&self) -> PathBuf {
        self.root.join("insights-pool.json")
    }

    pub fn decisions_pool_path(&self) -> PathBuf {
        self.root.join("decisions-pool.json")
    }

    /// Idempotent: existing files are overwritten with the empty schema
    /// (existing files are overwritten with the empty schema).
    pub async fn initialize(&self, worktree_count: u32) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.root.join("locks")).await?;

        let now = chrono::Utc::now();
        let insights = InsightsPool::empty(&self.exploration_id, now);
        let decisions = DecisionsPool::empty(&self.exploration_id, now);

        tokio::fs::write(
            self.insights_pool_path(),
            serde_json::to_vec_pretty(&insights)?,
        )
        .await?;
        tokio::fs::write(
            self.decisions_pool_path(),
            serde_json::to_vec_pretty(&decisions)?,
        )
        .await?;

        // 0-indexed, matching `WorktreeExploration::index` and
        // `worktree_id()`: the container mounted at `worktree-<idx>` and the
        // scratch directory read back by `monitor_containers` must agree.
        for i in 0..worktree_count {
            let dir = self.worktree_dir(i);
            tokio::fs::create_dir_all(&dir).await?;

            tokio::fs::write(
                dir.join("latest-insight.json"),
                serde_json::to_vec_pretty(&serde_json::json!({
                    "worktree_index": i,
                    "insight": null,
                    "last_updated": now,
                }))?,
            )
            .await?;

            tokio::fs::write(
                dir.join("metrics.json"),
                serde_json::to_vec_pretty(&serde_json::json!({
                    "worktree_index": i,
                    "insights_published": 0,
                    "decisions_participated": 0,
                    "last_updated": now,
                }))?,
            )
            .await?;

            tokio::fs::write(
                dir.join("progress.json"),
                serde_json::to_vec_pretty(&serde_json::json!({
                    "worktree_index": i,
                    "current_stage": "",
                    "percentage": 0,
                    "stages_completed": [],
                    "errors": [],
                    "insights_published": 0,
                    "last_update": now,
                }))?,
            )
            .await?;
        }

        tokio::fs::write(self.root.join("README.md"), README_TEMPLATE).await?;
        Ok(())
    }

    pub async fn validate(&self) -> Result<ValidationReport> {
        let mut missing = Vec::new();
        let mut errors = Vec::new();

        for required in ["insights-pool.json", "decisions-pool.json", "locks", "README.md"] {
            let path = self.root.join(required);
            if !path.exists() {
                missing.push(required.to_string());
            }
        }

        for path in [self.insights_pool_path(), self.decisions_pool_path()] {
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
                    errors.push(format!("{} is not valid JSON", path.display()));
                }
            }
        }

        Ok(ValidationReport {
            valid: missing.is_empty() && errors.is_empty(),
            missing_files: missing,
            errors,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        Ok(())
    }

    pub async fn size_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }

    pub async fn formatted_size(&self) -> Result<String> {
        let bytes = self.size_bytes().await?;
        Ok(format_bytes(bytes))
    }

    /// tar.gz the whole tree to `out_path`, returning a SHA-256 checksum of
    /// the archive so callers can verify it after copying it elsewhere.
    pub async fn archive(&self, out_path: &Path) -> Result<String> {
        let root = self.root.clone();
        let out_path_owned = out_path.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::create(&out_path_owned)?;
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", &root)?;
            builder.finish()?;
            Ok(())
        })
        .await
        .map_err(|e| ExplorationError::Internal(e.to_string()))??;

        checksum_file(out_path).await
    }
}

/// SHA-256 of a file's contents, hex-encoded. Grounded on the checksum used
/// to detect corrupted checkpoint state elsewhere in the host crate, applied
/// here to archived shared-volume snapshots instead of job state.
async fn checksum_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}
