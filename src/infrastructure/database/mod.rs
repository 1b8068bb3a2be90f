//! SQLite store implementations.

pub mod checkpoint_repo;
pub mod connection;
pub mod idempotency_repo;
pub mod job_repo;
pub mod key_repo;
pub mod run_repo;
pub mod utils;

pub use checkpoint_repo::SqliteCheckpointStore;
pub use connection::DatabaseConnection;
pub use idempotency_repo::SqliteIdempotencyStore;
pub use job_repo::SqliteJobQueue;
pub use key_repo::SqliteSigningKeyStore;
pub use run_repo::SqliteRunRepository;
