use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::checkpoint::Checkpoint;

/// Append-only checkpoint log, one per run.
///
/// Ordering is strictly by timestamp, ties broken by insertion order.
/// Checkpoints are never mutated; `clear` exists for tests only.
/// Implementations must be durable across process restarts for recovery
/// to work; the in-memory implementation logs a warning when constructed
/// outside of tests.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to the run's log.
    async fn save(&self, run_id: Uuid, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// All checkpoints for a run, in log order.
    async fn list(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, StoreError>;

    /// The most recent completed checkpoint, if any.
    async fn latest(&self, run_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Drop a run's log. Test use only.
    async fn clear(&self, run_id: Uuid) -> Result<(), StoreError>;

    async fn exists(&self, run_id: Uuid) -> Result<bool, StoreError>;
}
