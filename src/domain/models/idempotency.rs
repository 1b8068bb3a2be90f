//! Idempotency record domain model.
//!
//! A record tracks one logical inbound request. It is either in-flight
//! (`processing` with a live lock) or settled (`completed`/`failed` with
//! an expiry). Settled records replay their cached outcome to duplicates
//! until `expires_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event_key::EventSource;

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached outcome of the first processing of a key.
///
/// Stored as a tagged union over the small set of handler outcomes so the
/// replay path can reconstitute an HTTP or chat response without
/// persisting arbitrary runtime objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedResponse {
    /// A run was started for this event.
    RunStarted {
        run_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// The handler failed; duplicates replay the same error.
    Error { message: String },
    /// A plain text outcome (chat acknowledgements, scheduler summaries).
    Message { text: String },
}

impl CachedResponse {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::RunStarted { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }
}

/// One row in the idempotency store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub source: EventSource,
    pub tenant_id: String,
    pub status: IdempotencyStatus,
    /// SHA-256 of the canonicalized request payload (key order irrelevant).
    pub request_hash: String,
    pub run_id: Option<Uuid>,
    pub response: Option<CachedResponse>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A record is in-flight when processing under a live lock.
    pub fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.status == IdempotencyStatus::Processing
            && self.lock_expires_at.is_some_and(|lock| lock > now)
    }

    /// A settled record past its expiry is treated as absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_settled() && self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// Outcome of the transactional check-and-set on a key.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// This caller won the key; it holds the lock and must settle it.
    /// `lock_recovered` marks wins over an expired lock rather than a
    /// fresh key.
    New { lock_recovered: bool },
    /// The key already settled; the cached record is returned for replay.
    Duplicate(IdempotencyRecord),
    /// Another caller holds a live lock on the key.
    Processing(IdempotencyRecord),
}

impl CheckOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }
}
