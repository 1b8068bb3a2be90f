//! SQLite implementation of the signing key registry.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::models::approval::SigningKeyRecord;
use crate::domain::ports::key_store::SigningKeyStore;

use super::utils::{parse_datetime, parse_opt_datetime};

pub struct SqliteSigningKeyStore {
    pool: SqlitePool,
}

impl SqliteSigningKeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> Result<SigningKeyRecord, StoreError> {
        let q = |e: sqlx::Error| StoreError::QueryFailed(e.to_string());
        let created_at: String = row.try_get("created_at").map_err(q)?;
        let revoked_at: Option<String> = row.try_get("revoked_at").map_err(q)?;

        Ok(SigningKeyRecord {
            key_id: row.try_get("key_id").map_err(q)?,
            tenant_id: row.try_get("tenant_id").map_err(q)?,
            algorithm: row.try_get("algorithm").map_err(q)?,
            public_key: row.try_get("public_key").map_err(q)?,
            revoked: row.try_get::<i64, _>("revoked").map_err(q)? != 0,
            created_at: parse_datetime(&created_at)?,
            revoked_at: parse_opt_datetime(revoked_at.as_deref())?,
        })
    }
}

#[async_trait]
impl SigningKeyStore for SqliteSigningKeyStore {
    async fn register(&self, record: &SigningKeyRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO signing_keys
                (key_id, tenant_id, algorithm, public_key, revoked, created_at, revoked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.key_id)
        .bind(&record.tenant_id)
        .bind(&record.algorithm)
        .bind(&record.public_key)
        .bind(record.revoked as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(record.revoked_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKeyRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE key_id = ?")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn revoke(&self, key_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE signing_keys SET revoked = 1, revoked_at = ? WHERE key_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(key_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("signing key {key_id}")));
        }
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM signing_keys WHERE tenant_id = ? ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
