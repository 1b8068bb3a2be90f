//! Policy evaluation domain model.

use serde::{Deserialize, Serialize};

use super::approval::{Scope, SignedApproval};

/// Severity class of a policy rule. Higher severities dominate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl PolicyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Verdict of a single rule or of the whole evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    RequireMoreApprovals { reason: String, missing_scopes: Vec<Scope> },
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// The action a policy question is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAction {
    /// e.g. `apply`, `publish`.
    pub name: String,
    /// Whether the action is irreversible from the repository's view.
    pub destructive: bool,
}

/// The resource the action touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Publishing to a protected target demands two distinct approvers.
    #[serde(default)]
    pub protected: bool,
}

/// Everything a rule may inspect.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub tenant_id: String,
    pub action: PolicyAction,
    /// Actor on whose behalf the run executes.
    pub actor_id: String,
    pub resource: PolicyResource,
    /// Deployment environment tag (e.g. `production`).
    pub environment: String,
    /// Verified approvals only; unverifiable ones never reach a rule.
    pub approvals: Vec<SignedApproval>,
    pub required_scopes: Vec<Scope>,
}

impl PolicyContext {
    /// Union of scopes granted by the (already verified) approvals.
    pub fn approved_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self
            .approvals
            .iter()
            .filter(|a| a.decision == super::approval::ApprovalDecision::Approved)
            .flat_map(|a| a.scopes_approved.iter().copied())
            .collect();
        scopes.sort();
        scopes.dedup();
        scopes
    }

    /// Required scopes not covered by the approved-scope union.
    pub fn missing_scopes(&self) -> Vec<Scope> {
        let approved = self.approved_scopes();
        self.required_scopes
            .iter()
            .copied()
            .filter(|s| !approved.contains(s))
            .collect()
    }
}
