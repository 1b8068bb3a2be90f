//! In-memory idempotency store.
//!
//! A single mutex over the record map makes check-and-set trivially
//! linearizable within one process. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::error::StoreError;
use crate::domain::models::idempotency::{
    CachedResponse, CheckOutcome, IdempotencyRecord, IdempotencyStatus,
};
use crate::domain::ports::idempotency_store::{CheckAndSetParams, IdempotencyStore};

#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<(String, String), IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_and_set(&self, params: &CheckAndSetParams) -> Result<CheckOutcome, StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let map_key = (params.tenant_id.clone(), params.key.clone());

        if let Some(record) = records.get_mut(&map_key) {
            if record.status == IdempotencyStatus::Processing {
                if record.is_in_flight(now) {
                    return Ok(CheckOutcome::Processing(record.clone()));
                }
                if record.attempts >= params.max_attempts {
                    record.status = IdempotencyStatus::Failed;
                    record.error = Some("Max processing attempts exceeded".to_string());
                    record.lock_expires_at = None;
                    record.expires_at = Some(now + params.failed_ttl);
                    record.updated_at = now;
                    return Ok(CheckOutcome::Duplicate(record.clone()));
                }
                record.lock_expires_at = Some(now + params.lock_timeout);
                record.attempts += 1;
                record.updated_at = now;
                return Ok(CheckOutcome::New {
                    lock_recovered: true,
                });
            }

            if !record.is_expired(now) {
                return Ok(CheckOutcome::Duplicate(record.clone()));
            }
            // Expired settle: fall through and recreate.
        }

        records.insert(
            map_key,
            IdempotencyRecord {
                key: params.key.clone(),
                source: params.source,
                tenant_id: params.tenant_id.clone(),
                status: IdempotencyStatus::Processing,
                request_hash: params.request_hash.clone(),
                run_id: None,
                response: None,
                error: None,
                attempts: 1,
                created_at: now,
                updated_at: now,
                expires_at: None,
                lock_expires_at: Some(now + params.lock_timeout),
            },
        );
        Ok(CheckOutcome::New {
            lock_recovered: false,
        })
    }

    async fn settle_completed(
        &self,
        tenant_id: &str,
        key: &str,
        response: &CachedResponse,
        completed_ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(tenant_id.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("idempotency record {key}")))?;

        let now = Utc::now();
        record.status = IdempotencyStatus::Completed;
        record.response = Some(response.clone());
        record.run_id = response.run_id();
        record.error = None;
        record.lock_expires_at = None;
        record.expires_at = Some(now + completed_ttl);
        record.updated_at = now;
        Ok(())
    }

    async fn settle_failed(
        &self,
        tenant_id: &str,
        key: &str,
        error: &str,
        failed_ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(tenant_id.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("idempotency record {key}")))?;

        let now = Utc::now();
        record.status = IdempotencyStatus::Failed;
        record.error = Some(error.to_string());
        record.lock_expires_at = None;
        record.expires_at = Some(now + failed_ttl);
        record.updated_at = now;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(tenant_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let before = records.len();
        records.retain(|_, r| !r.expires_at.is_some_and(|exp| exp < now));
        Ok((before - records.len()) as u64)
    }
}
