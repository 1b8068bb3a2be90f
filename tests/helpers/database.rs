use gwi::DatabaseConnection;
use sqlx::SqlitePool;

/// Create an in-memory SQLite database with migrations applied.
///
/// One connection only: each in-memory connection would otherwise be a
/// separate database.
#[allow(dead_code)]
pub async fn setup_test_db() -> SqlitePool {
    let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
        .await
        .expect("failed to create test database");
    db.migrate().await.expect("failed to run migrations");
    db.pool().clone()
}

#[allow(dead_code)]
pub async fn teardown_test_db(pool: SqlitePool) {
    pool.close().await;
}
