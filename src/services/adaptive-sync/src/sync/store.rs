//! Local persistence for the application snapshot

use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use crate::sync::snapshot::ApplicationStateSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Key-value style storage holding one snapshot under a stable key
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing was stored yet
    async fn load(&self) -> AdaptiveSyncResult<Option<ApplicationStateSnapshot>>;

    async fn save(&self, snapshot: &ApplicationStateSnapshot) -> AdaptiveSyncResult<()>;

    /// Move an unreadable record out of the way so the next save does not
    /// overwrite it. Returns where it went.
    async fn set_aside(&self) -> AdaptiveSyncResult<Option<PathBuf>> {
        Ok(None)
    }
}

/// JSON file at `<state_dir>/<state_key>.json`, replaced atomically on save
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new<P: AsRef<Path>>(state_dir: P, state_key: &str) -> Self {
        Self {
            path: state_dir.as_ref().join(format!("{}.json", state_key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn corrupt_path(&self) -> PathBuf {
        self.path.with_extension("json.corrupt")
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> AdaptiveSyncResult<Option<ApplicationStateSnapshot>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AdaptiveSyncError::persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let snapshot = serde_json::from_slice(&content)?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ApplicationStateSnapshot) -> AdaptiveSyncResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AdaptiveSyncError::persistence(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await.map_err(|e| {
            AdaptiveSyncError::persistence(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| {
                AdaptiveSyncError::persistence(format!(
                    "Failed to replace {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        debug!(path = %self.path.display(), "Snapshot persisted");
        Ok(())
    }

    async fn set_aside(&self) -> AdaptiveSyncResult<Option<PathBuf>> {
        let target = self.corrupt_path();
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdaptiveSyncError::persistence(format!(
                "Failed to move {} aside: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// In-process store for embedding and tests. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    stored: Mutex<Option<ApplicationStateSnapshot>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<ApplicationStateSnapshot> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> AdaptiveSyncResult<Option<ApplicationStateSnapshot>> {
        Ok(self.stored.lock().clone())
    }

    async fn save(&self, snapshot: &ApplicationStateSnapshot) -> AdaptiveSyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AdaptiveSyncError::persistence("store rejected the write"));
        }
        *self.stored.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
