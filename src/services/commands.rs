//! Chat-command parsing for approvals.
//!
//! The gate understands `/gwi approve <target> [--scopes <csv>]`,
//! `/gwi deny <target> --reason <text>`, and `/gwi revoke <target>`.
//! Deny without a reason and approve with an empty scope list are
//! validation errors, not silent defaults.

use crate::domain::error::ValidationError;
use crate::domain::models::approval::Scope;

/// A parsed approval command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCommand {
    Approve { target: String, scopes: Vec<Scope> },
    Deny { target: String, reason: String },
    Revoke { target: String },
}

impl ApprovalCommand {
    pub fn target(&self) -> &str {
        match self {
            Self::Approve { target, .. } | Self::Deny { target, .. } | Self::Revoke { target } => {
                target
            }
        }
    }
}

/// Default scopes for `/gwi approve` without `--scopes`.
const DEFAULT_APPROVE_SCOPES: [Scope; 3] = [Scope::Commit, Scope::Push, Scope::OpenPr];

/// Parse a `/gwi` command string.
pub fn parse_command(input: &str) -> Result<ApprovalCommand, ValidationError> {
    let mut tokens = input.split_whitespace().peekable();

    match tokens.next() {
        Some("/gwi") => {}
        Some(other) => return Err(ValidationError::UnknownCommand(other.to_string())),
        None => return Err(ValidationError::UnknownCommand(String::new())),
    }

    let verb = tokens
        .next()
        .ok_or_else(|| ValidationError::UnknownCommand(input.to_string()))?;

    let target = tokens
        .next()
        .filter(|t| !t.starts_with("--"))
        .ok_or_else(|| ValidationError::InvalidTarget(input.to_string()))?
        .to_string();

    let mut scopes_arg: Option<String> = None;
    let mut reason_parts: Vec<&str> = Vec::new();
    let mut collecting_reason = false;

    while let Some(token) = tokens.next() {
        match token {
            "--scopes" => {
                collecting_reason = false;
                scopes_arg = tokens.next().map(str::to_string);
            }
            "--reason" => {
                collecting_reason = true;
            }
            other if collecting_reason => reason_parts.push(other),
            other => return Err(ValidationError::UnknownCommand(other.to_string())),
        }
    }

    match verb {
        "approve" => {
            let scopes = match scopes_arg {
                Some(csv) => {
                    let scopes =
                        Scope::parse_csv(&csv).map_err(ValidationError::UnknownScope)?;
                    if scopes.is_empty() {
                        return Err(ValidationError::ApproveWithoutScopes);
                    }
                    scopes
                }
                None => DEFAULT_APPROVE_SCOPES.to_vec(),
            };
            Ok(ApprovalCommand::Approve { target, scopes })
        }
        "deny" => {
            let reason = reason_parts.join(" ");
            if reason.is_empty() {
                return Err(ValidationError::DenyWithoutReason);
            }
            Ok(ApprovalCommand::Deny { target, reason })
        }
        "revoke" => Ok(ApprovalCommand::Revoke { target }),
        other => Err(ValidationError::UnknownCommand(other.to_string())),
    }
}
