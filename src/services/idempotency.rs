//! Idempotency service.
//!
//! Guarantees that each inbound event yields at most one downstream side
//! effect: the first delivery runs the handler under a store-held lock,
//! duplicates replay the first delivery's cached outcome, and concurrent
//! duplicates are rejected with a conflict the boundary turns into a 409.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::IdempotencyError;
use crate::domain::models::config::IdempotencyConfig;
use crate::domain::models::event_key::EventKey;
use crate::domain::models::idempotency::{CachedResponse, CheckOutcome, IdempotencyRecord};
use crate::domain::ports::idempotency_store::{CheckAndSetParams, IdempotencyStore};
use crate::infrastructure::crypto::content_hash;

use super::metrics::IdempotencyMetrics;

/// What `process` resolved to.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// True when this call actually invoked the handler.
    pub processed: bool,
    pub run_id: Option<Uuid>,
    pub response: Option<CachedResponse>,
}

pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyService {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        config: IdempotencyConfig,
        metrics: Arc<IdempotencyMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub fn metrics(&self) -> &IdempotencyMetrics {
        &self.metrics
    }

    pub fn conflict_retry_after_secs(&self) -> u32 {
        self.config.conflict_retry_after_secs
    }

    fn params(&self, key: &EventKey, tenant_id: &str, payload: &Value) -> CheckAndSetParams {
        CheckAndSetParams {
            key: key.encode(),
            source: key.source(),
            tenant_id: tenant_id.to_string(),
            request_hash: content_hash(payload),
            lock_timeout: Duration::milliseconds(self.config.lock_timeout_ms as i64),
            max_attempts: self.config.max_attempts,
            failed_ttl: Duration::milliseconds(self.config.failed_ttl_ms as i64),
        }
    }

    /// Process an event exactly once.
    ///
    /// The handler runs only when this delivery wins the key. Its result
    /// settles the record: `Ok` caches the response under the completed
    /// TTL; `Err` caches the message under the (shorter) failed TTL and
    /// the error is rethrown to the caller.
    #[instrument(skip(self, payload, handler), fields(key = %key))]
    pub async fn process<F, Fut>(
        &self,
        key: &EventKey,
        tenant_id: &str,
        payload: &Value,
        handler: F,
    ) -> Result<ProcessOutcome, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<CachedResponse>> + Send,
    {
        key.validate()?;
        let source = key.source();
        let encoded = key.encode();
        let params = self.params(key, tenant_id, payload);

        self.metrics.inc_checks(source);
        let outcome = self.store.check_and_set(&params).await?;

        match outcome {
            CheckOutcome::New { lock_recovered } => {
                self.metrics.inc_new(source);
                if lock_recovered {
                    self.metrics.inc_lock_recovery(source);
                }

                match handler().await {
                    Ok(response) => {
                        self.store
                            .settle_completed(
                                tenant_id,
                                &encoded,
                                &response,
                                Duration::milliseconds(self.config.completed_ttl_ms as i64),
                            )
                            .await?;
                        self.metrics.inc_completed(source);
                        info!(key = %encoded, "event processed");
                        Ok(ProcessOutcome {
                            processed: true,
                            run_id: response.run_id(),
                            response: Some(response),
                        })
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        self.store
                            .settle_failed(
                                tenant_id,
                                &encoded,
                                &message,
                                Duration::milliseconds(self.config.failed_ttl_ms as i64),
                            )
                            .await?;
                        self.metrics.inc_failed(source);
                        warn!(key = %encoded, error = %message, "event handler failed");
                        Err(IdempotencyError::HandlerFailed(message))
                    }
                }
            }
            CheckOutcome::Duplicate(record) => {
                self.metrics.inc_duplicate(source);
                debug!(key = %encoded, "duplicate delivery, replaying cached outcome");
                Ok(ProcessOutcome {
                    processed: false,
                    run_id: record.run_id,
                    response: record.response,
                })
            }
            CheckOutcome::Processing(_) => {
                self.metrics.inc_conflict(source);
                Err(IdempotencyError::Processing {
                    key: encoded,
                    retry_after_secs: self.config.conflict_retry_after_secs,
                })
            }
        }
    }

    /// The check-and-set without a handler.
    ///
    /// Used by the HTTP middleware, which must capture the downstream
    /// response outside the transaction and settle the record itself via
    /// [`complete`](Self::complete) or [`fail`](Self::fail).
    #[instrument(skip(self, payload), fields(key = %key))]
    pub async fn check(
        &self,
        key: &EventKey,
        tenant_id: &str,
        payload: &Value,
    ) -> Result<CheckOutcome, IdempotencyError> {
        key.validate()?;
        let source = key.source();
        let params = self.params(key, tenant_id, payload);

        self.metrics.inc_checks(source);
        let outcome = self.store.check_and_set(&params).await?;
        match &outcome {
            CheckOutcome::New { lock_recovered } => {
                self.metrics.inc_new(source);
                if *lock_recovered {
                    self.metrics.inc_lock_recovery(source);
                }
            }
            CheckOutcome::Duplicate(_) => self.metrics.inc_duplicate(source),
            CheckOutcome::Processing(_) => self.metrics.inc_conflict(source),
        }
        Ok(outcome)
    }

    /// Settle a checked key as completed.
    pub async fn complete(
        &self,
        key: &EventKey,
        tenant_id: &str,
        response: &CachedResponse,
    ) -> Result<(), IdempotencyError> {
        self.store
            .settle_completed(
                tenant_id,
                &key.encode(),
                response,
                Duration::milliseconds(self.config.completed_ttl_ms as i64),
            )
            .await?;
        self.metrics.inc_completed(key.source());
        Ok(())
    }

    /// Settle a checked key as failed.
    pub async fn fail(
        &self,
        key: &EventKey,
        tenant_id: &str,
        error: &str,
    ) -> Result<(), IdempotencyError> {
        self.store
            .settle_failed(
                tenant_id,
                &key.encode(),
                error,
                Duration::milliseconds(self.config.failed_ttl_ms as i64),
            )
            .await?;
        self.metrics.inc_failed(key.source());
        Ok(())
    }

    /// Non-mutating record lookup by raw key.
    pub async fn get_status(
        &self,
        tenant_id: &str,
        raw_key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        Ok(self.store.get(tenant_id, raw_key).await?)
    }

    /// Periodic TTL sweep. Returns the number of records removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let removed = self.store.cleanup_expired().await?;
        if removed > 0 {
            self.metrics.add_ttl_cleanups(removed);
            info!(removed, "cleaned up expired idempotency records");
        }
        Ok(removed)
    }
}
