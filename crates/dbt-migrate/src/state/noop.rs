//! No-op checkpoint store for runs without resume.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::error::Result;
use crate::state::backend::CheckpointStore;
use crate::state::MigrationState;

/// Checkpoint store that doesn't persist state. Logs a warning on first use.
pub struct NoOpCheckpointStore {
    warned: AtomicBool,
}

impl NoOpCheckpointStore {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!("No state file configured: progress will not be persisted and the run cannot be resumed");
        }
    }
}

impl Default for NoOpCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for NoOpCheckpointStore {
    async fn save(&self, _state: &MigrationState) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn load(&self) -> Result<Option<MigrationState>> {
        Ok(None)
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}
