//! Ports: the traits the core depends on.
//!
//! Infrastructure provides SQLite and in-memory implementations of the
//! store ports; agents and sandboxes are external collaborators.

pub mod agent;
pub mod approval_source;
pub mod checkpoint_store;
pub mod idempotency_store;
pub mod job_queue;
pub mod key_store;
pub mod null_agent;
pub mod run_repository;
pub mod sandbox;

pub use agent::{AgentError, AgentInvoker, AgentRequest, AgentResponse};
pub use null_agent::NullAgentInvoker;
pub use approval_source::ApprovalSource;
pub use checkpoint_store::CheckpointStore;
pub use idempotency_store::{CheckAndSetParams, IdempotencyStore};
pub use job_queue::JobQueue;
pub use key_store::SigningKeyStore;
pub use run_repository::{RunFilters, RunRepository};
pub use sandbox::{CommandOutcome, FileChange, Sandbox, SandboxError};
