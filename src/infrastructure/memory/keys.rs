//! In-memory signing key registry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::error::StoreError;
use crate::domain::models::approval::SigningKeyRecord;
use crate::domain::ports::key_store::SigningKeyStore;

#[derive(Default)]
pub struct MemorySigningKeyStore {
    keys: Mutex<HashMap<String, SigningKeyRecord>>,
}

impl MemorySigningKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SigningKeyStore for MemorySigningKeyStore {
    async fn register(&self, record: &SigningKeyRecord) -> Result<(), StoreError> {
        let mut keys = self.keys.lock().await;
        if keys.contains_key(&record.key_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "signing key {} already exists",
                record.key_id
            )));
        }
        keys.insert(record.key_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKeyRecord>, StoreError> {
        Ok(self.keys.lock().await.get(key_id).cloned())
    }

    async fn revoke(&self, key_id: &str) -> Result<(), StoreError> {
        let mut keys = self.keys.lock().await;
        let record = keys
            .get_mut(key_id)
            .ok_or_else(|| StoreError::NotFound(format!("signing key {key_id}")))?;
        record.revoked = true;
        record.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError> {
        let keys = self.keys.lock().await;
        let mut records: Vec<SigningKeyRecord> = keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
