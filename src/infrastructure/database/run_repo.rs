//! SQLite implementation of the run repository.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::run::{Run, RunStatus, RunStep, RunTrigger, RunType};
use crate::domain::ports::run_repository::{RunFilters, RunRepository};

use super::utils::{from_json_text, parse_datetime, parse_opt_datetime, to_json_text};

pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &SqliteRow) -> Result<Run, StoreError> {
        let q = |e: sqlx::Error| StoreError::QueryFailed(e.to_string());

        let id: String = row.try_get("id").map_err(q)?;
        let run_type: String = row.try_get("run_type").map_err(q)?;
        let status: String = row.try_get("status").map_err(q)?;
        let steps: Option<String> = row.try_get("steps").map_err(q)?;
        let trigger: String = row.try_get("trigger_info").map_err(q)?;
        let created_at: String = row.try_get("created_at").map_err(q)?;
        let updated_at: String = row.try_get("updated_at").map_err(q)?;
        let completed_at: Option<String> = row.try_get("completed_at").map_err(q)?;
        let last_heartbeat_at: Option<String> = row.try_get("last_heartbeat_at").map_err(q)?;
        let result: Option<String> = row.try_get("result").map_err(q)?;

        let steps: Vec<RunStep> = steps
            .as_deref()
            .map(from_json_text)
            .transpose()?
            .unwrap_or_default();
        let trigger: RunTrigger = from_json_text(&trigger)?;

        Ok(Run {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            tenant_id: row.try_get("tenant_id").map_err(q)?,
            run_type: RunType::from_str(&run_type)
                .ok_or_else(|| StoreError::Serialization(format!("unknown run type {run_type:?}")))?,
            status: RunStatus::from_str(&status)
                .ok_or_else(|| StoreError::Serialization(format!("unknown run status {status:?}")))?,
            current_step: row.try_get("current_step").map_err(q)?,
            steps,
            owner_id: row.try_get("owner_id").map_err(q)?,
            last_heartbeat_at: parse_opt_datetime(last_heartbeat_at.as_deref())?,
            resume_count: row.try_get::<i64, _>("resume_count").map_err(q)? as u32,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
            completed_at: parse_opt_datetime(completed_at.as_deref())?,
            duration_ms: row
                .try_get::<Option<i64>, _>("duration_ms")
                .map_err(q)?
                .map(|v| v as u64),
            error: row.try_get("error").map_err(q)?,
            result: result.as_deref().map(from_json_text).transpose()?,
            trigger,
        })
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs
                (id, tenant_id, run_type, status, current_step, steps, owner_id,
                 last_heartbeat_at, resume_count, created_at, updated_at,
                 completed_at, duration_ms, error, result, trigger_info)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.tenant_id)
        .bind(run.run_type.as_str())
        .bind(run.status.as_str())
        .bind(&run.current_step)
        .bind(to_json_text(&run.steps)?)
        .bind(&run.owner_id)
        .bind(run.last_heartbeat_at.map(|dt| dt.to_rfc3339()))
        .bind(run.resume_count as i64)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.duration_ms.map(|v| v as i64))
        .bind(&run.error)
        .bind(run.result.as_ref().map(to_json_text).transpose()?)
        .bind(to_json_text(&run.trigger)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        // Guarded against resurrecting terminal runs: the write lands
        // only while the stored status is in-flight, or when it already
        // equals the new status (idempotent rewrite of a terminal run).
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, current_step = ?, steps = ?, owner_id = ?,
                last_heartbeat_at = ?, resume_count = ?, updated_at = ?,
                completed_at = ?, duration_ms = ?, error = ?, result = ?
            WHERE id = ?
              AND (status NOT IN ('completed', 'failed', 'cancelled') OR status = ?)
            "#,
        )
        .bind(run.status.as_str())
        .bind(&run.current_step)
        .bind(to_json_text(&run.steps)?)
        .bind(&run.owner_id)
        .bind(run.last_heartbeat_at.map(|dt| dt.to_rfc3339()))
        .bind(run.resume_count as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.duration_ms.map(|v| v as i64))
        .bind(&run.error)
        .bind(run.result.as_ref().map(to_json_text).transpose()?)
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the run is unknown or it already reached a
            // different terminal status.
            let existing = self.get(run.id).await?;
            return match existing {
                None => Err(StoreError::NotFound(format!("run {}", run.id))),
                Some(r) => Err(StoreError::ConstraintViolation(format!(
                    "run {} is terminal ({}) and cannot move to {}",
                    run.id, r.status, run.status
                ))),
            };
        }
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        owner_id: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE runs
            SET last_heartbeat_at = ?, owner_id = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ?
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(&now)
        .bind(owner_id)
        .bind(&now)
        .bind(run_id.to_string())
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filters: &RunFilters) -> Result<Vec<Run>, StoreError> {
        let mut sql = String::from("SELECT * FROM runs WHERE 1=1");
        if filters.tenant_id.is_some() {
            sql.push_str(" AND tenant_id = ?");
        }
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filters.run_type.is_some() {
            sql.push_str(" AND run_type = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filters.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(tenant) = &filters.tenant_id {
            query = query.bind(tenant);
        }
        if let Some(status) = filters.status {
            query = query.bind(status.as_str());
        }
        if let Some(run_type) = filters.run_type {
            query = query.bind(run_type.as_str());
        }
        if let Some(limit) = filters.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn list_orphaned(&self, stale_threshold: Duration) -> Result<Vec<Run>, StoreError> {
        // Only running runs can be orphans: a pending run sitting in the
        // queue was never owned by a worker, so a stale (or absent)
        // heartbeat means nothing for it.
        let cutoff = (Utc::now() - stale_threshold).to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE status = 'running'
              AND (last_heartbeat_at IS NULL OR last_heartbeat_at < ?)
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_run).collect()
    }
}
