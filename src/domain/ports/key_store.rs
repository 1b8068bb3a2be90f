use async_trait::async_trait;

use crate::domain::error::StoreError;
use crate::domain::models::approval::SigningKeyRecord;

/// Process-wide registry of approval signing keys.
///
/// Writes (register/revoke) are rare and serialized by the store.
#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    async fn register(&self, record: &SigningKeyRecord) -> Result<(), StoreError>;

    async fn get(&self, key_id: &str) -> Result<Option<SigningKeyRecord>, StoreError>;

    async fn revoke(&self, key_id: &str) -> Result<(), StoreError>;

    async fn list(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError>;
}
