use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::approval::SignedApproval;

/// Where signed approvals come from.
///
/// The default implementation scans a directory of JSON files so humans
/// can pipe approvals through any VCS; a remote approval service can be
/// swapped in without touching the gate. Sources skip unreadable or
/// schema-invalid documents with a warning; a bad file is never fatal.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// All well-formed approvals targeting the given run, regardless of
    /// decision or verification state. Filtering and signature checks
    /// happen in the gate.
    async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<SignedApproval>, StoreError>;
}
