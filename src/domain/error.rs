//! Domain error types.
//!
//! One enum per concern, following the taxonomy: validation errors return
//! to the caller unchanged, conflicts are retried at the boundary,
//! transient store errors are retried with backoff, and everything else
//! surfaces on the run record as a human-readable `error`.

use thiserror::Error;
use uuid::Uuid;

use super::models::approval::Scope;
use super::models::event_key::EventSource;

/// Malformed input. Never retried, never elevated to a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed idempotency key: {0}")]
    MalformedKey(String),

    #[error("Unknown idempotency key source: {0}")]
    UnknownKeySource(String),

    #[error("Invalid {field} for {event_source} key: {value:?}")]
    InvalidKeyField {
        event_source: EventSource,
        field: &'static str,
        value: String,
    },

    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    #[error("Deny requires a --reason")]
    DenyWithoutReason,

    #[error("Approve requires at least one scope")]
    ApproveWithoutScopes,

    #[error("Unknown approval command: {0}")]
    UnknownCommand(String),

    #[error("Invalid command target: {0}")]
    InvalidTarget(String),
}

/// Storage failures. Connection-level problems are transient and retried
/// with backoff; the rest surface immediately.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::TransactionFailed(_) | Self::QueryFailed(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::ConnectionFailed(e.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

/// Idempotency layer failures.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// A concurrent duplicate is still processing. The HTTP boundary
    /// translates this to 409 + `Retry-After`.
    #[error("Request {key} is already being processed")]
    Processing { key: String, retry_after_secs: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The first handler execution failed; the cached error is replayed.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),
}

impl IdempotencyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }
}

/// Approval and signature verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Signing key revoked: {0}")]
    KeyRevoked(String),

    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature verification failed for approval {0}")]
    SignatureInvalid(Uuid),

    #[error("Malformed key material for {0}: {1}")]
    MalformedKeyMaterial(String, String),
}

/// The approval gate blocked a phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}. Run: gwi approval approve --run {run_id} --scopes {}", Scope::csv(.missing_scopes))]
pub struct PolicyDenied {
    pub run_id: Uuid,
    pub reason: String,
    pub missing_scopes: Vec<Scope>,
}

/// A phase of a run failed; earlier checkpoints remain valid.
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("Phase {phase} failed: {message}")]
    Failed { phase: String, message: String },

    #[error("Phase {phase} exceeded its {budget_secs}s budget")]
    Timeout { phase: String, budget_secs: u64 },

    #[error("Run was cancelled before phase {phase}")]
    Cancelled { phase: String },

    #[error(transparent)]
    Denied(#[from] PolicyDenied),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PhaseError {
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Failed { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::Cancelled { phase } => Some(phase),
            _ => None,
        }
    }
}

/// Startup recovery failures. A run failed here is terminal; recovery
/// never retries a run whose resume action failed.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("resume action failed: {0}")]
    ResumeActionFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_store_errors() {
        assert!(StoreError::ConnectionFailed("timeout".to_string()).is_transient());
        assert!(StoreError::TransactionFailed("busy".to_string()).is_transient());
        assert!(!StoreError::ConstraintViolation("unique".to_string()).is_transient());
        assert!(!StoreError::NotFound("run".to_string()).is_transient());
    }

    #[test]
    fn policy_denied_names_the_cli_command() {
        let run_id = Uuid::new_v4();
        let err = PolicyDenied {
            run_id,
            reason: "Missing approval for apply".to_string(),
            missing_scopes: vec![Scope::Commit, Scope::Push],
        };
        let msg = err.to_string();
        assert!(msg.contains("--scopes commit,push"));
        assert!(msg.contains(&run_id.to_string()));
    }

    #[test]
    fn processing_error_carries_the_key() {
        let err = IdempotencyError::Processing {
            key: "github:550e8400-e29b-41d4-a716-446655440000".to_string(),
            retry_after_secs: 5,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("github:"));
    }
}
