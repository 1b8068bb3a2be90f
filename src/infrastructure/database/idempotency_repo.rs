//! SQLite implementation of the idempotency store.
//!
//! The check-and-set is built on conditional writes: the create path is
//! an `INSERT .. ON CONFLICT DO NOTHING`, and every state change is an
//! `UPDATE` guarded on the state the caller observed. SQLite's single
//! writer linearizes concurrent callers; a caller that loses a guarded
//! write re-reads and re-decides.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::error::StoreError;
use crate::domain::models::event_key::EventSource;
use crate::domain::models::idempotency::{
    CachedResponse, CheckOutcome, IdempotencyRecord, IdempotencyStatus,
};
use crate::domain::ports::idempotency_store::{CheckAndSetParams, IdempotencyStore};

use super::utils::{from_json_text, parse_datetime, parse_opt_datetime, to_json_text};

/// Attempts before a check-and-set gives up on guarded-write races.
const MAX_CAS_ROUNDS: u32 = 8;

pub struct SqliteIdempotencyStore {
    pool: SqlitePool,
}

impl SqliteIdempotencyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> Result<IdempotencyRecord, StoreError> {
        let source_str: String = row
            .try_get("source")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let source = EventSource::from_str(&source_str)
            .ok_or_else(|| StoreError::Serialization(format!("unknown source {source_str:?}")))?;

        let status_str: String = row
            .try_get("status")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let status = IdempotencyStatus::from_str(&status_str)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status {status_str:?}")))?;

        let response: Option<String> = row
            .try_get("response")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let response: Option<CachedResponse> = response
            .as_deref()
            .map(from_json_text)
            .transpose()?;

        let run_id: Option<String> = row
            .try_get("run_id")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let run_id = run_id
            .as_deref()
            .map(uuid::Uuid::parse_str)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let expires_at: Option<String> = row
            .try_get("expires_at")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let lock_expires_at: Option<String> = row
            .try_get("lock_expires_at")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(IdempotencyRecord {
            key: row
                .try_get("key")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
            source,
            tenant_id: row
                .try_get("tenant_id")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
            status,
            request_hash: row
                .try_get("request_hash")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
            run_id,
            response,
            error: row
                .try_get("error")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
            attempts: row
                .try_get::<i64, _>("attempts")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))? as u32,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
            expires_at: parse_opt_datetime(expires_at.as_deref())?,
            lock_expires_at: parse_opt_datetime(lock_expires_at.as_deref())?,
        })
    }

    /// Try to create the record as `processing`. Returns true when this
    /// caller won the row.
    async fn try_create(
        &self,
        params: &CheckAndSetParams,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let lock_expires_at = (now + params.lock_timeout).to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (tenant_id, key, source, status, request_hash, attempts,
                 created_at, updated_at, lock_expires_at)
            VALUES (?, ?, ?, 'processing', ?, 1, ?, ?, ?)
            ON CONFLICT (tenant_id, key) DO NOTHING
            "#,
        )
        .bind(&params.tenant_id)
        .bind(&params.key)
        .bind(params.source.as_str())
        .bind(&params.request_hash)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(lock_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn check_and_set(&self, params: &CheckAndSetParams) -> Result<CheckOutcome, StoreError> {
        for _ in 0..MAX_CAS_ROUNDS {
            let now = Utc::now();

            if self.try_create(params, now).await? {
                return Ok(CheckOutcome::New {
                    lock_recovered: false,
                });
            }

            let Some(record) = self.get(&params.tenant_id, &params.key).await? else {
                // Deleted between the insert and the read; retry.
                continue;
            };

            if record.status == IdempotencyStatus::Processing {
                if record.is_in_flight(now) {
                    return Ok(CheckOutcome::Processing(record));
                }

                if record.attempts >= params.max_attempts {
                    // Crashed too many times; settle the key as failed so
                    // duplicates stop waking it up.
                    let updated = sqlx::query(
                        r#"
                        UPDATE idempotency_records
                        SET status = 'failed',
                            error = 'Max processing attempts exceeded',
                            lock_expires_at = NULL,
                            expires_at = ?,
                            updated_at = ?
                        WHERE tenant_id = ? AND key = ?
                          AND status = 'processing' AND attempts = ?
                        "#,
                    )
                    .bind((now + params.failed_ttl).to_rfc3339())
                    .bind(now.to_rfc3339())
                    .bind(&params.tenant_id)
                    .bind(&params.key)
                    .bind(record.attempts as i64)
                    .execute(&self.pool)
                    .await?;

                    if updated.rows_affected() == 1 {
                        let settled = self
                            .get(&params.tenant_id, &params.key)
                            .await?
                            .ok_or_else(|| {
                                StoreError::NotFound(format!("record {}", params.key))
                            })?;
                        return Ok(CheckOutcome::Duplicate(settled));
                    }
                    continue;
                }

                // Lock recovery: take over the expired lock.
                let recovered = sqlx::query(
                    r#"
                    UPDATE idempotency_records
                    SET lock_expires_at = ?, attempts = attempts + 1, updated_at = ?
                    WHERE tenant_id = ? AND key = ?
                      AND status = 'processing' AND attempts = ?
                    "#,
                )
                .bind((now + params.lock_timeout).to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(&params.tenant_id)
                .bind(&params.key)
                .bind(record.attempts as i64)
                .execute(&self.pool)
                .await?;

                if recovered.rows_affected() == 1 {
                    debug!(key = %params.key, attempts = record.attempts + 1, "recovered expired idempotency lock");
                    return Ok(CheckOutcome::New {
                        lock_recovered: true,
                    });
                }
                continue;
            }

            // Settled record.
            if record.is_expired(now) {
                // Expired settles are treated as absent: delete (guarded
                // on what we read) and recreate on the next round.
                sqlx::query(
                    r#"
                    DELETE FROM idempotency_records
                    WHERE tenant_id = ? AND key = ? AND updated_at = ?
                    "#,
                )
                .bind(&params.tenant_id)
                .bind(&params.key)
                .bind(record.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
                continue;
            }

            return Ok(CheckOutcome::Duplicate(record));
        }

        Err(StoreError::TransactionFailed(format!(
            "check-and-set on {} did not settle after {MAX_CAS_ROUNDS} rounds",
            params.key
        )))
    }

    async fn settle_completed(
        &self,
        tenant_id: &str,
        key: &str,
        response: &CachedResponse,
        completed_ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let run_id = response.run_id().map(|id| id.to_string());
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'completed',
                response = ?,
                run_id = ?,
                error = NULL,
                lock_expires_at = NULL,
                expires_at = ?,
                updated_at = ?
            WHERE tenant_id = ? AND key = ?
            "#,
        )
        .bind(to_json_text(response)?)
        .bind(run_id)
        .bind((now + completed_ttl).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(tenant_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("idempotency record {key}")));
        }
        Ok(())
    }

    async fn settle_failed(
        &self,
        tenant_id: &str,
        key: &str,
        error: &str,
        failed_ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'failed',
                error = ?,
                lock_expires_at = NULL,
                expires_at = ?,
                updated_at = ?
            WHERE tenant_id = ? AND key = ?
            "#,
        )
        .bind(error)
        .bind((now + failed_ttl).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(tenant_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("idempotency record {key}")));
        }
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM idempotency_records WHERE tenant_id = ? AND key = ?",
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM idempotency_records WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
