//! SQLite implementation of the durable job queue.
//!
//! Claiming is a guarded UPDATE on a single pending row; concurrent
//! claimers resolve to exactly one winner per job.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::job::{DurableJob, JobStatus};
use crate::domain::ports::job_queue::JobQueue;

use super::utils::{from_json_text, parse_datetime, parse_opt_datetime, to_json_text};

pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &SqliteRow) -> Result<DurableJob, StoreError> {
        let q = |e: sqlx::Error| StoreError::QueryFailed(e.to_string());

        let id: String = row.try_get("id").map_err(q)?;
        let status: String = row.try_get("status").map_err(q)?;
        let run_id: Option<String> = row.try_get("run_id").map_err(q)?;
        let payload: String = row.try_get("payload").map_err(q)?;
        let result: Option<String> = row.try_get("result").map_err(q)?;
        let claimed_at: Option<String> = row.try_get("claimed_at").map_err(q)?;
        let started_at: Option<String> = row.try_get("started_at").map_err(q)?;
        let completed_at: Option<String> = row.try_get("completed_at").map_err(q)?;
        let last_heartbeat: Option<String> = row.try_get("last_heartbeat").map_err(q)?;
        let created_at: String = row.try_get("created_at").map_err(q)?;
        let updated_at: String = row.try_get("updated_at").map_err(q)?;

        Ok(DurableJob {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            job_type: row.try_get("job_type").map_err(q)?,
            tenant_id: row.try_get("tenant_id").map_err(q)?,
            run_id: run_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            payload: from_json_text(&payload)?,
            status: JobStatus::from_str(&status)
                .ok_or_else(|| StoreError::Serialization(format!("unknown job status {status:?}")))?,
            attempts: row.try_get::<i64, _>("attempts").map_err(q)? as u32,
            max_retries: row.try_get::<i64, _>("max_retries").map_err(q)? as u32,
            priority: row.try_get::<i64, _>("priority").map_err(q)? as i32,
            claimed_by: row.try_get("claimed_by").map_err(q)?,
            claimed_at: parse_opt_datetime(claimed_at.as_deref())?,
            started_at: parse_opt_datetime(started_at.as_deref())?,
            completed_at: parse_opt_datetime(completed_at.as_deref())?,
            last_heartbeat: parse_opt_datetime(last_heartbeat.as_deref())?,
            error: row.try_get("error").map_err(q)?,
            result: result.as_deref().map(from_json_text).transpose()?,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &DurableJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO durable_jobs
                (id, job_type, tenant_id, run_id, payload, status, attempts,
                 max_retries, priority, claimed_by, claimed_at, started_at,
                 completed_at, last_heartbeat, error, result, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.job_type)
        .bind(&job.tenant_id)
        .bind(job.run_id.map(|id| id.to_string()))
        .bind(to_json_text(&job.payload)?)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_retries as i64)
        .bind(job.priority as i64)
        .bind(&job.claimed_by)
        .bind(job.claimed_at.map(|dt| dt.to_rfc3339()))
        .bind(job.started_at.map(|dt| dt.to_rfc3339()))
        .bind(job.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(job.last_heartbeat.map(|dt| dt.to_rfc3339()))
        .bind(&job.error)
        .bind(job.result.as_ref().map(to_json_text).transpose()?)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: &[&str],
    ) -> Result<Option<DurableJob>, StoreError> {
        if job_types.is_empty() {
            return Ok(None);
        }

        // Candidate selection and the claim itself are separate
        // statements; the guarded UPDATE makes the claim atomic, and a
        // lost race just picks the next candidate.
        let placeholders = vec!["?"; job_types.len()].join(", ");
        let select_sql = format!(
            "SELECT id FROM durable_jobs WHERE status = 'pending' AND job_type IN ({placeholders}) \
             ORDER BY priority DESC, created_at ASC LIMIT 8"
        );

        let mut select = sqlx::query(&select_sql);
        for job_type in job_types {
            select = select.bind(*job_type);
        }
        let candidates = select.fetch_all(&self.pool).await?;

        let now = Utc::now().to_rfc3339();
        for row in &candidates {
            let id: String = row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let claimed = sqlx::query(
                r#"
                UPDATE durable_jobs
                SET status = 'claimed', claimed_by = ?, claimed_at = ?,
                    last_heartbeat = ?, updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
            )
            .bind(worker_id)
            .bind(&now)
            .bind(&now)
            .bind(&now)
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                let job_id = Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                return self.get(job_id).await;
            }
        }

        Ok(None)
    }

    async fn start(&self, job_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE durable_jobs
            SET status = 'running', started_at = ?, attempts = attempts + 1, updated_at = ?
            WHERE id = ? AND status = 'claimed'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "job {job_id} is not in a claimable state"
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE durable_jobs
            SET status = 'completed', result = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(result.as_ref().map(to_json_text).transpose()?)
        .bind(&now)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<JobStatus, StoreError> {
        let job = self
            .get(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

        let now = Utc::now().to_rfc3339();
        let next_status = if job.can_retry() {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };

        sqlx::query(
            r#"
            UPDATE durable_jobs
            SET status = ?, error = ?, claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status IN ('claimed', 'running')
            "#,
        )
        .bind(next_status.as_str())
        .bind(error)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(next_status)
    }

    async fn to_dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE durable_jobs
            SET status = 'dead_letter', error = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('claimed', 'running')
            "#,
        )
        .bind(error)
        .bind(&now)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE durable_jobs SET last_heartbeat = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<DurableJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM durable_jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }
}
