//! In-memory store implementations.
//!
//! Selected by the `memory` store backend. Nothing survives a process
//! restart; use these for tests and local development only.

pub mod checkpoints;
pub mod idempotency;
pub mod jobs;
pub mod keys;
pub mod runs;

pub use checkpoints::MemoryCheckpointStore;
pub use idempotency::MemoryIdempotencyStore;
pub use jobs::MemoryJobQueue;
pub use keys::MemorySigningKeyStore;
pub use runs::MemoryRunRepository;
