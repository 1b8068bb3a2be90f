//! Approval gate.
//!
//! In front of every irreversible phase: load the signed approvals for
//! the run, verify each against the key registry, discard anything with
//! a stale intent hash, and ask the policy engine whether the action may
//! proceed. An approval that does not verify is treated exactly as if it
//! did not exist.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{PolicyDenied, StoreError};
use crate::domain::models::approval::{ApprovalDecision, Scope, SignedApproval};
use crate::domain::models::policy::{
    PolicyAction, PolicyContext, PolicyDecision, PolicyResource,
};
use crate::domain::ports::approval_source::ApprovalSource;
use crate::domain::ports::key_store::SigningKeyStore;
use crate::infrastructure::crypto::verify_approval;

use super::policy::PolicyEngine;

#[derive(Error, Debug)]
pub enum GateError {
    #[error(transparent)]
    Denied(#[from] PolicyDenied),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One authorization question.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub tenant_id: String,
    pub run_id: Uuid,
    /// Actor on whose behalf the run executes.
    pub actor_id: String,
    pub action: PolicyAction,
    pub resource: PolicyResource,
    pub environment: String,
    pub required_scopes: Vec<Scope>,
    /// Hash of the plan the phase is about to execute. Approvals signed
    /// over a different plan are ignored.
    pub intent_hash: String,
}

pub struct ApprovalGate {
    source: Arc<dyn ApprovalSource>,
    key_store: Arc<dyn SigningKeyStore>,
    engine: PolicyEngine,
}

impl ApprovalGate {
    pub fn new(
        source: Arc<dyn ApprovalSource>,
        key_store: Arc<dyn SigningKeyStore>,
        engine: PolicyEngine,
    ) -> Self {
        Self {
            source,
            key_store,
            engine,
        }
    }

    /// Authorize an action, or explain what approval is missing.
    #[instrument(skip(self, request), fields(run_id = %request.run_id, action = %request.action.name))]
    pub async fn authorize(&self, request: &GateRequest) -> Result<(), GateError> {
        let approvals = self.verified_approvals(request).await?;
        debug!(
            count = approvals.len(),
            "verified approvals for gate decision"
        );

        let ctx = PolicyContext {
            tenant_id: request.tenant_id.clone(),
            action: request.action.clone(),
            actor_id: request.actor_id.clone(),
            resource: request.resource.clone(),
            environment: request.environment.clone(),
            approvals,
            required_scopes: request.required_scopes.clone(),
        };

        match self.engine.evaluate(&ctx) {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny { reason } => Err(PolicyDenied {
                run_id: request.run_id,
                reason,
                missing_scopes: request.required_scopes.clone(),
            }
            .into()),
            PolicyDecision::RequireMoreApprovals {
                reason,
                missing_scopes,
            } => {
                let missing = if missing_scopes.is_empty() {
                    request.required_scopes.clone()
                } else {
                    missing_scopes
                };
                Err(PolicyDenied {
                    run_id: request.run_id,
                    reason,
                    missing_scopes: missing,
                }
                .into())
            }
        }
    }

    /// Load, filter, and signature-verify the approvals for a run.
    ///
    /// Kept approvals are `approved`, unexpired, match the intent hash,
    /// and verify against a registered, unrevoked key.
    async fn verified_approvals(
        &self,
        request: &GateRequest,
    ) -> Result<Vec<SignedApproval>, StoreError> {
        let candidates = self.source.list_for_run(request.run_id).await?;
        let now = Utc::now();
        let mut verified = Vec::new();

        for approval in candidates {
            if approval.decision != ApprovalDecision::Approved {
                continue;
            }
            if approval.expires_at.is_some_and(|exp| exp < now) {
                warn!(approval_id = %approval.approval_id, "skipping expired approval");
                continue;
            }
            if approval.intent_hash != request.intent_hash {
                warn!(
                    approval_id = %approval.approval_id,
                    "skipping approval with mismatched intent hash"
                );
                continue;
            }

            let Some(key) = self.key_store.get(&approval.signing_key_id).await? else {
                warn!(
                    approval_id = %approval.approval_id,
                    key_id = %approval.signing_key_id,
                    "skipping approval with unknown signing key"
                );
                continue;
            };

            match verify_approval(&approval, &key) {
                Ok(()) => verified.push(approval),
                Err(e) => {
                    warn!(
                        approval_id = %approval.approval_id,
                        error = %e,
                        "skipping approval that failed verification"
                    );
                }
            }
        }

        Ok(verified)
    }
}
