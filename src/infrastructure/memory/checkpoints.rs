//! In-memory checkpoint store.
//!
//! Not durable: recovery cannot see checkpoints written by a previous
//! process. Construction outside of tests logs a warning for exactly
//! that reason.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::checkpoint::Checkpoint;
use crate::domain::models::run::StepStatus;
use crate::domain::ports::checkpoint_store::CheckpointStore;

#[derive(Default)]
pub struct MemoryCheckpointStore {
    logs: Mutex<HashMap<Uuid, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    /// Production constructor. Warns: in-memory checkpoints cannot
    /// support cross-process recovery.
    pub fn new() -> Self {
        warn!(
            "in-memory checkpoint store in use; checkpoints will not survive a process restart \
             and startup recovery will fail orphaned runs"
        );
        Self::default()
    }

    /// Test constructor; no warning.
    pub fn for_tests() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, run_id: Uuid, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().await;
        logs.entry(run_id).or_default().push(checkpoint.clone());
        Ok(())
    }

    async fn list(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, StoreError> {
        let logs = self.logs.lock().await;
        let mut checkpoints = logs.get(&run_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        checkpoints.sort_by_key(|c| c.timestamp);
        Ok(checkpoints)
    }

    async fn latest(&self, run_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let checkpoints = self.list(run_id).await?;
        Ok(checkpoints
            .into_iter()
            .rev()
            .find(|c| c.status == StepStatus::Completed))
    }

    async fn clear(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.logs.lock().await.remove(&run_id);
        Ok(())
    }

    async fn exists(&self, run_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .logs
            .lock()
            .await
            .get(&run_id)
            .is_some_and(|log| !log.is_empty()))
    }
}
