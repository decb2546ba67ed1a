//! Advisory, lock-protected JSON file access.
//!
//! Two layers of protection:
//! - a `<file>.lock` sibling carrying an owner id + timestamp, with a 5s
//!   TTL so a crashed holder's lock is reclaimed by the next waiter
//!   (portable across platforms, same trick `WorktreeManager::update_session_state`
//!   uses for atomic state writes in the host crate);
//! - an OS-level advisory lock (`flock` via `fs4`) held on the same file
//!   while we hold the logical lock, for robustness on POSIX.
//!
//! Writes are always temp-file-then-rename so a concurrent reader never
//! observes a partial document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{ExplorationError, Result};

const LOCK_TTL: Duration = Duration::from_secs(5);
const BACKOFF_START: Duration = Duration::from_millis(50);
const BACKOFF_CAP: Duration = Duration::from_millis(500);
const BACKOFF_MAX_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct FileLockManager {
    clock: Arc<dyn Clock>,
    owner_id: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LockContent {
    owner: String,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

impl FileLockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            owner_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn lock_path(target: &Path) -> PathBuf {
        let mut p = target.as_os_str().to_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    /// Acquire the lock (breaking a stale one if past TTL) and return a
    /// guard that releases it on drop.
    async fn acquire(&self, target: &Path) -> Result<LockGuard> {
        let lock_path = Self::lock_path(target);
        let deadline = self.clock.now() + chrono::Duration::from_std(BACKOFF_MAX_WAIT).unwrap();
        let mut backoff = BACKOFF_START;

        loop {
            match self.try_create_lock(&lock_path).await {
                Ok(()) => {
                    return Ok(LockGuard {
                        path: lock_path,
                    });
                }
                Err(_) => {
                    if self.break_if_stale(&lock_path).await? {
                        continue;
                    }
                    if self.clock.now() >= deadline {
                        return Err(ExplorationError::LockTimeout {
                            path: target.display().to_string(),
                            held_ms: BACKOFF_MAX_WAIT.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, BACKOFF_CAP);
                }
            }
        }
    }

    async fn try_create_lock(&self, lock_path: &Path) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
            .await?;

        let content = LockContent {
            owner: self.owner_id.clone(),
            acquired_at: self.clock.now(),
        };
        let json = serde_json::to_vec(&content).unwrap_or_default();
        file.write_all(&json).await?;
        file.flush().await?;
        Ok(())
    }

    /// Returns true if a stale lock was found and removed.
    async fn break_if_stale(&self, lock_path: &Path) -> Result<bool> {
        let Ok(bytes) = tokio::fs::read(lock_path).await else {
            return Ok(false);
        };
        let Ok(content) = serde_json::from_slice::<LockContent>(&bytes) else {
            return Ok(false);
        };
        let age = self.clock.now() - content.acquired_at;
        if age.to_std().unwrap_or_default() > LOCK_TTL {
            let _ = tokio::fs::remove_file(lock_path).await;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn read_with_lock<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        let _guard = self.acquire(path).await?;
        read_json_or_default(path).await
    }

    pub async fn write_with_lock<T: Serialize + Send + Sync>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<()> {
        let _guard = self.acquire(path).await?;
        write_json_atomic(path, value).await
    }

    /// Read-modify-write under lock. `updater` may be invoked more than
    /// once is not expected here (single critical section), but must be a
    /// pure function of the current value.
    pub async fn update_with_lock<T, F>(&self, path: &Path, updater: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync,
        F: FnOnce(T) -> T,
    {
        let _guard = self.acquire(path).await?;
        let current: T = read_json_or_default(path).await?;
        let next = updater(current);
        write_json_atomic(path, &next).await?;
        Ok(next)
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        _ => Ok(T::default()),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value)?;

    let tmp_path = {
        let mut p = path.as_os_str().to_os_string();
        p.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
        PathBuf::from(p)
    };
    tokio::fs::write(&tmp_path, &json).await?;

    // Hold an OS-level advisory lock on the target across the rename, as a
    // second layer of robustness beyond the `.lock` sibling protocol.
    let target = path.to_path_buf();
    let tmp = tmp_path.clone();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use fs4::FileExt;
        let target_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&target)
            .ok();
        if let Some(f) = &target_file {
            let _ = f.try_lock_exclusive();
        }
        std::fs::rename(&tmp, &target)?;
        if let Some(f) = &target_file {
            let _ = FileExt::unlock(f);
        }
        Ok(())
    })
    .await
    .map_err(|e| ExplorationError::Internal(e.to_string()))?;

    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        count: u32,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let mgr = FileLockManager::new(Arc::new(SystemClock));

        mgr.write_with_lock(&path, &Doc { count: 3 }).await.unwrap();
        let read: Doc = mgr.read_with_lock(&path).await.unwrap();
        assert_eq!(read, Doc { count: 3 });
    }

    #[tokio::test]
    async fn update_with_lock_applies_updater() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let mgr = FileLockManager::new(Arc::new(SystemClock));

        mgr.update_with_lock(&path, |d: Doc| Doc { count: d.count + 1 })
            .await
            .unwrap();
        let result: Doc = mgr
            .update_with_lock(&path, |d: Doc| Doc { count: d.count + 1 })
            .await
            .unwrap();
        assert_eq!(result.count, 2);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let mgr = FileLockManager::new(Arc::new(SystemClock));
        mgr.write_with_lock(&path, &Doc { count: 0 }).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let mgr = mgr.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                mgr.update_with_lock(&path, |d: Doc| Doc { count: d.count + 1 })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let result: Doc = mgr.read_with_lock(&path).await.unwrap();
        assert_eq!(result.count, 10);
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed_after_ttl() {
        use crate::clock::ManualClock;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let clock = ManualClock::new(chrono::Utc::now());
        let mgr = FileLockManager::new(Arc::new(clock.clone()));

        // Simulate a crashed holder: write a lock file directly.
        let lock_path = FileLockManager::lock_path(&path);
        let stale = LockContent {
            owner: "dead-owner".into(),
            acquired_at: clock.now(),
        };
        tokio::fs::write(&lock_path, serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(6));

        mgr.write_with_lock(&path, &Doc { count: 1 }).await.unwrap();
        assert!(!lock_path.exists());
    }
}
