//! `gwi approval` handlers.
//!
//! Approve/deny/revoke write signed JSON documents into the approval
//! directory; the gate picks them up on the next destructive phase.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output;
use crate::domain::error::ValidationError;
use crate::domain::models::approval::{
    ApprovalDecision, ApprovalTarget, Approver, ApproverRole, Scope, SignedApproval,
};
use crate::infrastructure::approvals::FsApprovalSource;
use crate::infrastructure::crypto::{decode_private_key, sign_approval, verify_approval};
use crate::services::phases::plan_intent_hash;

use super::{parse_run_id, CliError};

fn parse_role(raw: &str) -> Result<ApproverRole, CliError> {
    match raw.to_uppercase().as_str() {
        "OWNER" => Ok(ApproverRole::Owner),
        "MAINTAINER" => Ok(ApproverRole::Maintainer),
        "REVIEWER" => Ok(ApproverRole::Reviewer),
        other => Err(CliError::Validation(format!(
            "invalid role: {other}. Must be one of: OWNER, MAINTAINER, REVIEWER"
        ))),
    }
}

fn parse_target(raw: &str) -> Result<ApprovalTarget, CliError> {
    if let Ok(run_id) = Uuid::parse_str(raw) {
        return Ok(ApprovalTarget::Run { run_id });
    }
    if let Some(pr_id) = raw.strip_prefix("pr:") {
        return Ok(ApprovalTarget::PullRequest {
            pr_id: pr_id.to_string(),
        });
    }
    if let Some(candidate_id) = raw.strip_prefix("candidate:") {
        return Ok(ApprovalTarget::Candidate {
            candidate_id: candidate_id.to_string(),
        });
    }
    Err(ValidationError::InvalidTarget(raw.to_string()).into())
}

/// The intent hash of the plan currently on record for a run.
async fn current_intent_hash(ctx: &AppContext, run_id: Uuid) -> Result<String, CliError> {
    let latest = ctx.checkpoints.latest(run_id).await?;
    let state = latest
        .and_then(|c| c.output)
        .unwrap_or(Value::Null);
    Ok(plan_intent_hash(&state))
}

#[allow(clippy::too_many_arguments)]
async fn write_signed(
    ctx: &AppContext,
    target: ApprovalTarget,
    decision: ApprovalDecision,
    scopes: Vec<Scope>,
    reason: Option<String>,
    approver: &str,
    role: ApproverRole,
    key_id: &str,
    key_file: &str,
    json: bool,
) -> Result<(), CliError> {
    let key_record = ctx
        .key_store
        .get(key_id)
        .await?
        .ok_or_else(|| CliError::Signature(format!("signing key not found: {key_id}")))?;
    if key_record.revoked {
        return Err(CliError::Signature(format!("signing key revoked: {key_id}")));
    }

    let encoded_key = std::fs::read_to_string(key_file)
        .map_err(|e| CliError::Signature(format!("cannot read key file {key_file}: {e}")))?;
    let signing_key = decode_private_key(&encoded_key)?;

    let intent_hash = match target.run_id() {
        Some(run_id) => current_intent_hash(ctx, run_id).await?,
        None => plan_intent_hash(&Value::Null),
    };

    let mut approval = SignedApproval {
        approval_id: Uuid::new_v4(),
        tenant_id: ctx.config.worker.tenant_id.clone(),
        approver: Approver {
            approver_type: "user".to_string(),
            id: approver.to_string(),
            email: None,
        },
        approver_role: role,
        decision,
        scopes_approved: scopes,
        target,
        intent_hash,
        reason,
        source: "cli".to_string(),
        signing_key_id: key_id.to_string(),
        signature: String::new(),
        created_at: Utc::now(),
        expires_at: None,
    };
    sign_approval(&mut approval, &signing_key);

    // The document must verify against the registered public key
    // before it lands in the approval directory.
    verify_approval(&approval, &key_record)?;

    let dir = std::path::Path::new(&ctx.config.approvals.dir);
    std::fs::create_dir_all(dir)
        .map_err(|e| CliError::Store(format!("cannot create {}: {e}", dir.display())))?;
    let path = dir.join(FsApprovalSource::file_name(approval.approval_id));
    let contents = serde_json::to_string_pretty(&approval)
        .map_err(|e| CliError::Store(e.to_string()))?;
    std::fs::write(&path, contents)
        .map_err(|e| CliError::Store(format!("cannot write {}: {e}", path.display())))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&approval)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        output::success(&format!(
            "{} approval {} written to {}",
            approval.decision.as_str(),
            approval.approval_id,
            path.display()
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_approve(
    ctx: &AppContext,
    run: &str,
    scopes_csv: &str,
    approver: &str,
    role: &str,
    key_id: &str,
    key_file: &str,
    json: bool,
) -> Result<(), CliError> {
    let run_id = parse_run_id(run)?;
    let scopes = Scope::parse_csv(scopes_csv).map_err(ValidationError::UnknownScope)?;
    if scopes.is_empty() {
        return Err(ValidationError::ApproveWithoutScopes.into());
    }
    let role = parse_role(role)?;

    write_signed(
        ctx,
        ApprovalTarget::Run { run_id },
        ApprovalDecision::Approved,
        scopes,
        None,
        approver,
        role,
        key_id,
        key_file,
        json,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_deny(
    ctx: &AppContext,
    target: &str,
    reason: &str,
    approver: &str,
    role: &str,
    key_id: &str,
    key_file: &str,
    json: bool,
) -> Result<(), CliError> {
    if reason.trim().is_empty() {
        return Err(ValidationError::DenyWithoutReason.into());
    }
    let target = parse_target(target)?;
    let role = parse_role(role)?;

    write_signed(
        ctx,
        target,
        ApprovalDecision::Denied,
        Vec::new(),
        Some(reason.to_string()),
        approver,
        role,
        key_id,
        key_file,
        json,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_revoke(
    ctx: &AppContext,
    target: &str,
    approver: &str,
    role: &str,
    key_id: &str,
    key_file: &str,
    json: bool,
) -> Result<(), CliError> {
    let target = parse_target(target)?;
    let role = parse_role(role)?;

    write_signed(
        ctx,
        target,
        ApprovalDecision::Revoked,
        Vec::new(),
        None,
        approver,
        role,
        key_id,
        key_file,
        json,
    )
    .await
}

/// Verify every approval on file for a run against the key registry.
pub async fn handle_verify(ctx: &AppContext, run: &str, json: bool) -> Result<(), CliError> {
    let run_id = parse_run_id(run)?;
    let approvals = ctx.approval_source.list_for_run(run_id).await?;

    let mut report = Vec::new();
    for approval in &approvals {
        let verdict = match ctx.key_store.get(&approval.signing_key_id).await? {
            None => format!("signing key not found: {}", approval.signing_key_id),
            Some(key) => match verify_approval(approval, &key) {
                Ok(()) => "verified".to_string(),
                Err(e) => e.to_string(),
            },
        };
        report.push(serde_json::json!({
            "approval_id": approval.approval_id,
            "approver": approval.approver.id,
            "decision": approval.decision.as_str(),
            "scopes": Scope::csv(&approval.scopes_approved),
            "verdict": verdict,
        }));
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else if report.is_empty() {
        println!("no approvals on file for run {run_id}");
    } else {
        for entry in &report {
            println!(
                "{}  {}  {}  [{}]  {}",
                entry["approval_id"].as_str().unwrap_or("-"),
                entry["approver"].as_str().unwrap_or("-"),
                entry["decision"].as_str().unwrap_or("-"),
                entry["scopes"].as_str().unwrap_or(""),
                entry["verdict"].as_str().unwrap_or("-"),
            );
        }
    }

    let all_verified = report
        .iter()
        .all(|e| e["verdict"].as_str() == Some("verified"));
    if !all_verified {
        return Err(CliError::Signature(
            "one or more approvals failed verification".to_string(),
        ));
    }
    Ok(())
}
