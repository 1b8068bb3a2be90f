//! SQLite connection pool management.
//!
//! WAL mode for concurrent readers, NORMAL synchronous, foreign keys on,
//! busy timeout to ride out lock contention between workers.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::domain::error::StoreError;

/// Database connection pool manager.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool.
    ///
    /// `database_url` is a SQLite URL, e.g. `sqlite:.gwi/gwi.db` or
    /// `sqlite::memory:`.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::ConnectionFailed(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("failed to create pool: {e}")))?;

        Ok(Self { pool })
    }

    /// Apply pending migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections. Call during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_and_migration() {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .expect("failed to create connection");
        db.migrate().await.expect("failed to run migrations");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' \
             AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .expect("failed to list tables");

        let names: Vec<String> = tables.into_iter().map(|t| t.0).collect();
        for expected in [
            "checkpoints",
            "durable_jobs",
            "idempotency_records",
            "runs",
            "signing_keys",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }

        db.close().await;
    }
}
