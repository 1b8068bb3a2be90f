//! Filesystem approval source.
//!
//! Scans a directory (conventionally `.gwi/approvals/`) of JSON
//! documents. The directory is the hand-off point between humans and the
//! core: approvals arrive out-of-band, typically committed through the
//! same VCS as the code. Files that fail to parse or validate are
//! skipped with a warning; a bad file never takes the gate down.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::approval::SignedApproval;
use crate::domain::ports::approval_source::ApprovalSource;

pub struct FsApprovalSource {
    dir: PathBuf,
}

impl FsApprovalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name convention for approvals written by the CLI.
    pub fn file_name(approval_id: Uuid) -> String {
        format!("approval-{approval_id}.json")
    }

    async fn load_all(&self) -> Result<Vec<SignedApproval>, StoreError> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "approval directory does not exist");
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("read {}: {e}", self.dir.display())))?;

        let mut approvals = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable approval file");
                    continue;
                }
            };

            match serde_json::from_str::<SignedApproval>(&contents) {
                Ok(approval) => approvals.push(approval),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping invalid approval file");
                }
            }
        }

        Ok(approvals)
    }
}

#[async_trait]
impl ApprovalSource for FsApprovalSource {
    async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<SignedApproval>, StoreError> {
        let approvals = self.load_all().await?;
        Ok(approvals
            .into_iter()
            .filter(|a| a.target.run_id() == Some(run_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::approval::{
        ApprovalDecision, ApprovalTarget, Approver, ApproverRole, Scope,
    };
    use chrono::Utc;

    fn approval_for(run_id: Uuid) -> SignedApproval {
        SignedApproval {
            approval_id: Uuid::new_v4(),
            tenant_id: "t-1".to_string(),
            approver: Approver {
                approver_type: "user".to_string(),
                id: "u-2".to_string(),
                email: None,
            },
            approver_role: ApproverRole::Owner,
            decision: ApprovalDecision::Approved,
            scopes_approved: vec![Scope::Commit],
            target: ApprovalTarget::Run { run_id },
            intent_hash: "h".to_string(),
            reason: None,
            source: "cli".to_string(),
            signing_key_id: "k-1".to_string(),
            signature: "sig".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn loads_matching_approvals_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let other_run = Uuid::new_v4();

        let a = approval_for(run_id);
        let b = approval_for(other_run);
        std::fs::write(
            dir.path().join("a.json"),
            serde_json::to_string(&a).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            serde_json::to_string(&b).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = FsApprovalSource::new(dir.path());
        let loaded = source.list_for_run(run_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].approval_id, a.approval_id);
    }

    #[tokio::test]
    async fn missing_directory_is_empty_not_fatal() {
        let source = FsApprovalSource::new("/nonexistent/gwi-approvals");
        let loaded = source.list_for_run(Uuid::new_v4()).await.unwrap();
        assert!(loaded.is_empty());
    }
}
