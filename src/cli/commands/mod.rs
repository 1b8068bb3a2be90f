//! Command handlers.
//!
//! Every handler maps failures onto the CLI's exit-code contract:
//! 1 validation, 2 signature/key, 3 store.

pub mod approval;
pub mod idempotency;
pub mod key;
pub mod run;
pub mod worker;

use thiserror::Error;

use crate::domain::error::{ApprovalError, StoreError, ValidationError};

use super::exit_codes;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Signature(String),

    #[error("{0}")]
    Store(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => exit_codes::VALIDATION,
            Self::Signature(_) => exit_codes::SIGNATURE,
            Self::Store(_) => exit_codes::STORE,
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<ApprovalError> for CliError {
    fn from(e: ApprovalError) -> Self {
        Self::Signature(e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

pub fn parse_run_id(raw: &str) -> Result<uuid::Uuid, CliError> {
    uuid::Uuid::parse_str(raw)
        .map_err(|_| CliError::Validation(format!("invalid run id: {raw}")))
}
