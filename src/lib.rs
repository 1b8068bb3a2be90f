//! Git With Intent - durable execution core.
//!
//! Orchestrates autonomous agent runs that turn GitHub issues into pull
//! requests, with:
//! - Idempotent event intake (at-most-once handler invocation)
//! - A checkpointed phase pipeline (analyze, plan, apply, test, publish)
//! - Heartbeat-based ownership and orphan detection
//! - Startup recovery that resumes or fails orphans, never loops
//! - A policy gate verifying signed approvals before irreversible phases

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use infrastructure::database::DatabaseConnection;
