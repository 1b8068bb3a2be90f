//! Policy engine.
//!
//! Rules are evaluated in priority order (critical first). The first
//! rule producing a deny or a require-more-approvals verdict
//! short-circuits; allows accumulate. Independently of the rules, a
//! non-empty required-scope set that is not covered by the approved
//! union forces `RequireMoreApprovals`.

use tracing::debug;

use crate::domain::models::approval::{ApprovalDecision, ApproverRole, Scope};
use crate::domain::models::policy::{PolicyContext, PolicyDecision, PolicyPriority};

/// A named predicate over the policy context. `None` abstains.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> PolicyPriority;
    fn evaluate(&self, ctx: &PolicyContext) -> Option<PolicyDecision>;
}

pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEngine {
    pub fn new(mut rules: Vec<Box<dyn PolicyRule>>) -> Self {
        // Stable: rules of equal priority keep registration order.
        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { rules }
    }

    /// Engine with the built-in rule set.
    pub fn with_builtin_rules() -> Self {
        Self::new(vec![
            Box::new(NoSelfApproval),
            Box::new(DestructiveRequiresOwner),
            Box::new(ProtectedTargetTwoApprovals),
            Box::new(RequireApproval),
        ])
    }

    pub fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision {
        for rule in &self.rules {
            match rule.evaluate(ctx) {
                Some(PolicyDecision::Allow) => {
                    debug!(rule = rule.name(), "policy rule allowed");
                }
                Some(decision) => {
                    debug!(rule = rule.name(), ?decision, "policy rule short-circuited");
                    return decision;
                }
                None => {}
            }
        }

        // Coverage backstop: allowed-unless-denied, except when required
        // scopes are not covered.
        let missing = ctx.missing_scopes();
        if !ctx.required_scopes.is_empty() && !missing.is_empty() {
            return PolicyDecision::RequireMoreApprovals {
                reason: format!(
                    "Missing approval for scopes: {}",
                    Scope::csv(&missing)
                ),
                missing_scopes: missing,
            };
        }

        PolicyDecision::Allow
    }
}

/// Non-empty required scopes demand at least one matching approval.
struct RequireApproval;

impl PolicyRule for RequireApproval {
    fn name(&self) -> &'static str {
        "require-approval"
    }

    fn priority(&self) -> PolicyPriority {
        PolicyPriority::High
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<PolicyDecision> {
        if ctx.required_scopes.is_empty() {
            return None;
        }
        let has_matching = ctx
            .approvals
            .iter()
            .filter(|a| a.decision == ApprovalDecision::Approved)
            .any(|a| {
                a.scopes_approved
                    .iter()
                    .any(|s| ctx.required_scopes.contains(s))
            });
        if has_matching {
            None
        } else {
            Some(PolicyDecision::RequireMoreApprovals {
                reason: format!(
                    "No approval covers any of the required scopes: {}",
                    Scope::csv(&ctx.required_scopes)
                ),
                missing_scopes: ctx.required_scopes.clone(),
            })
        }
    }
}

/// The actor of a run cannot approve their own run.
struct NoSelfApproval;

impl PolicyRule for NoSelfApproval {
    fn name(&self) -> &'static str {
        "no-self-approval"
    }

    fn priority(&self) -> PolicyPriority {
        PolicyPriority::Critical
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<PolicyDecision> {
        let (self_approvals, other_approvals): (Vec<_>, Vec<_>) = ctx
            .approvals
            .iter()
            .filter(|a| a.decision == ApprovalDecision::Approved)
            .partition(|a| a.approver.id == ctx.actor_id);

        if self_approvals.is_empty() {
            return None;
        }

        // Self-approvals carry no weight. When the remaining approvals
        // still cover the required scopes the rule abstains; otherwise
        // the self-approval was load-bearing and is rejected.
        let covered: Vec<Scope> = other_approvals
            .iter()
            .flat_map(|a| a.scopes_approved.iter().copied())
            .collect();
        let missing: Vec<Scope> = ctx
            .required_scopes
            .iter()
            .copied()
            .filter(|s| !covered.contains(s))
            .collect();

        if missing.is_empty() {
            None
        } else {
            Some(PolicyDecision::RequireMoreApprovals {
                reason: "same actor cannot approve own run".to_string(),
                missing_scopes: missing,
            })
        }
    }
}

/// The `delete` scope needs an approval from an OWNER.
struct DestructiveRequiresOwner;

impl PolicyRule for DestructiveRequiresOwner {
    fn name(&self) -> &'static str {
        "destructive-requires-owner"
    }

    fn priority(&self) -> PolicyPriority {
        PolicyPriority::Critical
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<PolicyDecision> {
        if !ctx.required_scopes.contains(&Scope::Delete) {
            return None;
        }
        let owner_approved = ctx
            .approvals
            .iter()
            .filter(|a| a.decision == ApprovalDecision::Approved)
            .any(|a| a.approver_role == ApproverRole::Owner && a.grants(Scope::Delete));
        if owner_approved {
            None
        } else {
            Some(PolicyDecision::RequireMoreApprovals {
                reason: "scope 'delete' requires an approval from an OWNER".to_string(),
                missing_scopes: vec![Scope::Delete],
            })
        }
    }
}

/// Publishing to a protected target requires two distinct approvers.
struct ProtectedTargetTwoApprovals;

impl PolicyRule for ProtectedTargetTwoApprovals {
    fn name(&self) -> &'static str {
        "protected-target-two-approvals"
    }

    fn priority(&self) -> PolicyPriority {
        PolicyPriority::High
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<PolicyDecision> {
        if !ctx.resource.protected {
            return None;
        }
        let mut approver_ids: Vec<&str> = ctx
            .approvals
            .iter()
            .filter(|a| a.decision == ApprovalDecision::Approved)
            .map(|a| a.approver.id.as_str())
            .collect();
        approver_ids.sort_unstable();
        approver_ids.dedup();

        if approver_ids.len() >= 2 {
            None
        } else {
            Some(PolicyDecision::RequireMoreApprovals {
                reason: "publishing to a protected target requires two distinct approvers"
                    .to_string(),
                missing_scopes: ctx.missing_scopes(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::approval::{
        ApprovalTarget, Approver, SignedApproval,
    };
    use crate::domain::models::policy::{PolicyAction, PolicyResource};
    use chrono::Utc;
    use uuid::Uuid;

    fn approval(approver_id: &str, role: ApproverRole, scopes: Vec<Scope>) -> SignedApproval {
        SignedApproval {
            approval_id: Uuid::new_v4(),
            tenant_id: "t-1".to_string(),
            approver: Approver {
                approver_type: "user".to_string(),
                id: approver_id.to_string(),
                email: None,
            },
            approver_role: role,
            decision: ApprovalDecision::Approved,
            scopes_approved: scopes,
            target: ApprovalTarget::Run {
                run_id: Uuid::new_v4(),
            },
            intent_hash: "h".to_string(),
            reason: None,
            source: "cli".to_string(),
            signing_key_id: "k-1".to_string(),
            signature: "sig".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    fn ctx(
        actor: &str,
        approvals: Vec<SignedApproval>,
        required: Vec<Scope>,
    ) -> PolicyContext {
        PolicyContext {
            tenant_id: "t-1".to_string(),
            action: PolicyAction {
                name: "apply".to_string(),
                destructive: true,
            },
            actor_id: actor.to_string(),
            resource: PolicyResource::default(),
            environment: "production".to_string(),
            approvals,
            required_scopes: required,
        }
    }

    #[test]
    fn covered_scopes_allow() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx(
            "u-1",
            vec![approval("u-2", ApproverRole::Maintainer, vec![Scope::Commit, Scope::Push])],
            vec![Scope::Commit, Scope::Push],
        );
        assert_eq!(engine.evaluate(&context), PolicyDecision::Allow);
    }

    #[test]
    fn uncovered_scopes_require_more_approvals() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx(
            "u-1",
            vec![approval("u-2", ApproverRole::Maintainer, vec![Scope::Commit])],
            vec![Scope::Commit, Scope::Push],
        );
        match engine.evaluate(&context) {
            PolicyDecision::RequireMoreApprovals { missing_scopes, .. } => {
                assert_eq!(missing_scopes, vec![Scope::Push]);
            }
            other => panic!("expected RequireMoreApprovals, got {other:?}"),
        }
    }

    #[test]
    fn no_approvals_at_all_requires_more() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx("u-1", vec![], vec![Scope::Commit, Scope::Push]);
        match engine.evaluate(&context) {
            PolicyDecision::RequireMoreApprovals { missing_scopes, .. } => {
                assert_eq!(missing_scopes, vec![Scope::Commit, Scope::Push]);
            }
            other => panic!("expected RequireMoreApprovals, got {other:?}"),
        }
    }

    #[test]
    fn self_approval_is_rejected() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx(
            "u-1",
            vec![approval("u-1", ApproverRole::Owner, vec![Scope::Commit, Scope::Push])],
            vec![Scope::Commit, Scope::Push],
        );
        match engine.evaluate(&context) {
            PolicyDecision::RequireMoreApprovals { reason, .. } => {
                assert_eq!(reason, "same actor cannot approve own run");
            }
            other => panic!("expected RequireMoreApprovals, got {other:?}"),
        }
    }

    #[test]
    fn self_approval_is_harmless_when_others_cover() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx(
            "u-1",
            vec![
                approval("u-1", ApproverRole::Owner, vec![Scope::Commit, Scope::Push]),
                approval("u-2", ApproverRole::Maintainer, vec![Scope::Commit, Scope::Push]),
            ],
            vec![Scope::Commit, Scope::Push],
        );
        assert_eq!(engine.evaluate(&context), PolicyDecision::Allow);
    }

    #[test]
    fn delete_needs_an_owner() {
        let engine = PolicyEngine::with_builtin_rules();
        let context = ctx(
            "u-1",
            vec![approval("u-2", ApproverRole::Maintainer, vec![Scope::Delete])],
            vec![Scope::Delete],
        );
        match engine.evaluate(&context) {
            PolicyDecision::RequireMoreApprovals { reason, .. } => {
                assert!(reason.contains("OWNER"));
            }
            other => panic!("expected RequireMoreApprovals, got {other:?}"),
        }

        let owner_ctx = ctx(
            "u-1",
            vec![approval("u-2", ApproverRole::Owner, vec![Scope::Delete])],
            vec![Scope::Delete],
        );
        assert_eq!(engine.evaluate(&owner_ctx), PolicyDecision::Allow);
    }

    #[test]
    fn protected_target_needs_two_distinct_approvers() {
        let engine = PolicyEngine::with_builtin_rules();
        let mut context = ctx(
            "u-1",
            vec![approval("u-2", ApproverRole::Owner, vec![Scope::OpenPr])],
            vec![Scope::OpenPr],
        );
        context.resource = PolicyResource {
            repository: Some("org/repo".to_string()),
            branch: Some("main".to_string()),
            protected: true,
        };
        assert!(matches!(
            engine.evaluate(&context),
            PolicyDecision::RequireMoreApprovals { .. }
        ));

        context
            .approvals
            .push(approval("u-3", ApproverRole::Maintainer, vec![Scope::OpenPr]));
        assert_eq!(engine.evaluate(&context), PolicyDecision::Allow);
    }
}
