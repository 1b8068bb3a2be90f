use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::job::{DurableJob, JobStatus};

/// Claim-and-lease queue for durable jobs.
///
/// Claiming relies on the store's conditional writes: only a `pending`
/// row can be claimed, and concurrent claimers on the same row resolve
/// to exactly one winner.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &DurableJob) -> Result<(), StoreError>;

    /// Claim the highest-priority pending job of one of the given types.
    /// Returns `None` when the queue is empty.
    async fn claim(
        &self,
        worker_id: &str,
        job_types: &[&str],
    ) -> Result<Option<DurableJob>, StoreError>;

    /// Mark a claimed job as running.
    async fn start(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Record a failure. Returns the resulting status: `Pending` when
    /// the attempt budget allows a retry, `Failed` otherwise.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<JobStatus, StoreError>;

    /// Move a running job to the dead-letter state. Dead-lettered jobs
    /// are never retried.
    async fn to_dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Stamp the job lease heartbeat.
    async fn heartbeat(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<DurableJob>, StoreError>;
}
