use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::run::{Run, RunStatus, RunType};

/// Filters for run listings.
#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    pub tenant_id: Option<String>,
    pub status: Option<RunStatus>,
    pub run_type: Option<RunType>,
    pub limit: Option<u32>,
}

/// Repository interface for run persistence.
///
/// Runs are owned by the orchestrator of the claiming worker; the
/// recovery orchestrator may reassign ownership of orphans. Terminal
/// statuses are final: an update that would move a terminal run back to
/// an in-flight status must be rejected by the implementation.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert(&self, run: &Run) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Full-row update. Implementations refuse to resurrect terminal
    /// runs: the write succeeds only when the stored status is still
    /// in-flight, or when it already equals the new status.
    async fn update(&self, run: &Run) -> Result<(), StoreError>;

    /// Stamp `last_heartbeat_at = now` and `owner_id` on an in-flight
    /// run. A no-op (Ok) when the run has meanwhile reached a terminal
    /// status.
    async fn update_heartbeat(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        owner_id: &str,
    ) -> Result<(), StoreError>;

    async fn list(&self, filters: &RunFilters) -> Result<Vec<Run>, StoreError>;

    /// Running runs whose heartbeat is older than `now - stale_threshold`
    /// (a claimed run that never stamped a heartbeat counts as stale).
    /// Pending runs are queued work nobody owns yet, never orphans.
    async fn list_orphaned(&self, stale_threshold: Duration) -> Result<Vec<Run>, StoreError>;
}
