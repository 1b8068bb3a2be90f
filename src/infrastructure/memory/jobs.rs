//! In-memory durable job queue.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::job::{DurableJob, JobStatus};
use crate::domain::ports::job_queue::JobQueue;

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, DurableJob>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &DurableJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::ConstraintViolation(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: &[&str],
    ) -> Result<Option<DurableJob>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();

        let candidate = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && job_types.contains(&j.job_type.as_str()))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        job.status = JobStatus::Claimed;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.last_heartbeat = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn start(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Claimed {
            return Err(StoreError::ConstraintViolation(format!(
                "job {job_id} is not in a claimable state"
            )));
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                let now = Utc::now();
                job.status = JobStatus::Completed;
                job.result = result;
                job.completed_at = Some(now);
                job.updated_at = now;
            }
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<JobStatus, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

        let next_status = if job.can_retry() {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
        job.status = next_status;
        job.error = Some(error.to_string());
        job.claimed_by = None;
        job.claimed_at = None;
        job.updated_at = Utc::now();
        Ok(next_status)
    }

    async fn to_dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            let now = Utc::now();
            job.status = JobStatus::DeadLetter;
            job.error = Some(error.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            let now = Utc::now();
            job.last_heartbeat = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<DurableJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }
}
