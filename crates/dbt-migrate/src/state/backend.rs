//! Checkpoint store trait for migration state snapshots.
//!
//! The orchestrator works with `Arc<dyn CheckpointStore>` and does not know
//! the storage medium. [`FileCheckpointStore`] keeps one HMAC-signed JSON file;
//! [`NoOpCheckpointStore`](super::NoOpCheckpointStore) keeps nothing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::MigrationState;
use crate::error::Result;

/// Trait for migration state persistence.
///
/// Implementations must be `Send + Sync` so the store can be shared as a
/// trait object.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot, replacing the previous one.
    async fn save(&self, state: &MigrationState) -> Result<()>;

    /// Load the latest snapshot, or `None` if nothing was saved.
    async fn load(&self) -> Result<Option<MigrationState>>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// JSON state file with atomic replace.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &MigrationState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut snapshot = state.clone();
        snapshot.save(&self.path)?;
        debug!(
            "Checkpoint saved to {:?} (phase {}, cursor {})",
            self.path, snapshot.phase, snapshot.cursor
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<MigrationState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        MigrationState::load(&self.path).map(Some)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
