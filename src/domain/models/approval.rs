//! Signed approval domain model.
//!
//! Approvals are immutable once written. They grant named scopes on a
//! target and are verified against a registered public key before any
//! policy decision considers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named capability an approval can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Commit,
    Push,
    OpenPr,
    Deploy,
    Delete,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Push => "push",
            Self::OpenPr => "open_pr",
            Self::Deploy => "deploy",
            Self::Delete => "delete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(Self::Commit),
            "push" => Some(Self::Push),
            "open_pr" => Some(Self::OpenPr),
            "deploy" => Some(Self::Deploy),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Parse a comma-separated scope list, rejecting unknown names.
    pub fn parse_csv(csv: &str) -> Result<Vec<Scope>, String> {
        let mut scopes = Vec::new();
        for part in csv.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match Scope::from_str(part) {
                Some(s) => {
                    if !scopes.contains(&s) {
                        scopes.push(s);
                    }
                }
                None => return Err(part.to_string()),
            }
        }
        Ok(scopes)
    }

    /// Render scopes as the `a,b,c` form used in CLI hints.
    pub fn csv(scopes: &[Scope]) -> String {
        scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
    Revoked,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Revoked => "revoked",
        }
    }
}

/// Role of the approver within the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverRole {
    #[serde(rename = "OWNER")]
    Owner,
    #[serde(rename = "MAINTAINER")]
    Maintainer,
    #[serde(rename = "REVIEWER")]
    Reviewer,
}

/// Who granted the approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub approver_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// What the approval applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "snake_case")]
pub enum ApprovalTarget {
    Run { run_id: Uuid },
    Candidate { candidate_id: String },
    PullRequest { pr_id: String },
}

impl ApprovalTarget {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Run { run_id } => Some(*run_id),
            _ => None,
        }
    }
}

/// A cryptographically signed authorization.
///
/// The signature covers the canonical byte form of every field except
/// `signature` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedApproval {
    pub approval_id: Uuid,
    pub tenant_id: String,
    pub approver: Approver,
    pub approver_role: ApproverRole,
    pub decision: ApprovalDecision,
    pub scopes_approved: Vec<Scope>,
    pub target: ApprovalTarget,
    /// SHA-256 over the canonical form of the plan the approver saw.
    pub intent_hash: String,
    /// Mandatory for denials; optional context otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub source: String,
    pub signing_key_id: String,
    /// Base64-encoded ed25519 signature.
    pub signature: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SignedApproval {
    pub fn grants(&self, scope: Scope) -> bool {
        self.decision == ApprovalDecision::Approved && self.scopes_approved.contains(&scope)
    }
}

/// Registered public key metadata for approval verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub key_id: String,
    pub tenant_id: String,
    /// Only `ed25519` is supported.
    pub algorithm: String,
    /// Base64-encoded public key bytes.
    pub public_key: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SigningKeyRecord {
    pub const ALGORITHM_ED25519: &'static str = "ed25519";
}
