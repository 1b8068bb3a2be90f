use async_trait::async_trait;
use chrono::Duration;

use crate::domain::error::StoreError;
use crate::domain::models::event_key::EventSource;
use crate::domain::models::idempotency::{CachedResponse, CheckOutcome, IdempotencyRecord};

/// Parameters for the transactional check-and-set.
#[derive(Debug, Clone)]
pub struct CheckAndSetParams {
    pub key: String,
    pub source: EventSource,
    pub tenant_id: String,
    pub request_hash: String,
    /// How long the acquired processing lock is honored.
    pub lock_timeout: Duration,
    /// Lock recoveries permitted before the key is force-failed.
    pub max_attempts: u32,
    /// Expiry applied when the key is force-failed at the attempt cap.
    pub failed_ttl: Duration,
}

/// Store interface for idempotency records.
///
/// Records are owned by the store; the service mutates them only through
/// these operations. `check_and_set` must be linearizable across workers:
/// for concurrent callers on one key, exactly one observes `New`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Transactional check-and-set on a key.
    ///
    /// - absent (or settled-and-expired) record: create it as
    ///   `processing` under a fresh lock and return `New`.
    /// - `processing` with a live lock: return `Processing`.
    /// - `processing` with an expired lock: either recover the lock
    ///   (attempts+1, return `New`) or, once `max_attempts` is reached,
    ///   settle the record as failed and return `Duplicate`.
    /// - settled within TTL: return `Duplicate`.
    async fn check_and_set(&self, params: &CheckAndSetParams) -> Result<CheckOutcome, StoreError>;

    /// Settle a record as completed and extend its expiry by the
    /// completed TTL. Clears the processing lock.
    async fn settle_completed(
        &self,
        tenant_id: &str,
        key: &str,
        response: &CachedResponse,
        completed_ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Settle a record as failed with the error message, using the
    /// (shorter) failed TTL so legitimate retries can land.
    async fn settle_failed(
        &self,
        tenant_id: &str,
        key: &str,
        error: &str,
        failed_ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Non-mutating lookup.
    async fn get(&self, tenant_id: &str, key: &str)
        -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Delete every record with `expires_at` in the past. Returns the
    /// number of records removed.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}
