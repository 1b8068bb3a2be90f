//! SQLite implementation of the checkpoint store.
//!
//! `seq` is a per-run monotonically increasing counter so timestamp ties
//! keep insertion order.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::checkpoint::Checkpoint;
use crate::domain::models::run::StepStatus;
use crate::domain::ports::checkpoint_store::CheckpointStore;

use super::utils::{from_json_text, parse_datetime, to_json_text};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint, StoreError> {
        let q = |e: sqlx::Error| StoreError::QueryFailed(e.to_string());

        let status: String = row.try_get("status").map_err(q)?;
        let input: Option<String> = row.try_get("input").map_err(q)?;
        let output: Option<String> = row.try_get("output").map_err(q)?;
        let timestamp: String = row.try_get("timestamp").map_err(q)?;

        Ok(Checkpoint {
            step_id: row.try_get("step_id").map_err(q)?,
            agent: row.try_get("agent").map_err(q)?,
            status: StepStatus::from_str(&status)
                .ok_or_else(|| StoreError::Serialization(format!("unknown step status {status:?}")))?,
            input: input.as_deref().map(from_json_text).transpose()?,
            output: output.as_deref().map(from_json_text).transpose()?,
            error: row.try_get("error").map_err(q)?,
            tokens_used: row.try_get::<i64, _>("tokens_used").map_err(q)? as u64,
            duration_ms: row.try_get::<i64, _>("duration_ms").map_err(q)? as u64,
            resumable: row.try_get::<i64, _>("resumable").map_err(q)? != 0,
            idempotent: row.try_get::<i64, _>("idempotent").map_err(q)? != 0,
            timestamp: parse_datetime(&timestamp)?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, run_id: Uuid, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (run_id, seq, step_id, agent, status, input, output, error,
                 tokens_used, duration_ms, resumable, idempotent, timestamp)
            VALUES
                (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE run_id = ?),
                 ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.to_string())
        .bind(run_id.to_string())
        .bind(&checkpoint.step_id)
        .bind(&checkpoint.agent)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.input.as_ref().map(to_json_text).transpose()?)
        .bind(checkpoint.output.as_ref().map(to_json_text).transpose()?)
        .bind(&checkpoint.error)
        .bind(checkpoint.tokens_used as i64)
        .bind(checkpoint.duration_ms as i64)
        .bind(checkpoint.resumable as i64)
        .bind(checkpoint.idempotent as i64)
        .bind(checkpoint.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY timestamp ASC, seq ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn latest(&self, run_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM checkpoints
            WHERE run_id = ? AND status = 'completed'
            ORDER BY timestamp DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn clear(&self, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM checkpoints WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }
}
