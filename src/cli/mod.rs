//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use clap::{Parser, Subcommand};

/// Exit codes the CLI contracts to scripts.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const VALIDATION: i32 = 1;
    pub const SIGNATURE: i32 = 2;
    pub const STORE: i32 = 3;
}

#[derive(Parser)]
#[command(name = "gwi", about = "Durable execution core for agent runs", version)]
pub struct Cli {
    /// Emit JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and manage runs.
    #[command(subcommand)]
    Run(RunCommands),

    /// Manage signed approvals.
    #[command(subcommand)]
    Approval(ApprovalCommands),

    /// Manage approval signing keys.
    #[command(subcommand)]
    Key(KeyCommands),

    /// Inspect the idempotency layer.
    #[command(subcommand)]
    Idempotency(IdempotencyCommands),

    /// Start a worker: recovery pass, then the job loop.
    Worker {
        /// Run one recovery pass and exit without claiming jobs.
        #[arg(long)]
        recover_only: bool,
    },

    /// Start the HTTP intake server.
    Serve,
}

#[derive(Subcommand)]
pub enum RunCommands {
    /// List runs.
    List {
        /// Filter by status (pending|running|completed|failed|cancelled).
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one run with its steps.
    Show { run_id: String },
    /// Cancel an in-flight run. Takes effect between phases.
    Cancel { run_id: String },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// Produce a signed approval file for a run.
    Approve {
        #[arg(long)]
        run: String,
        /// Comma-separated scopes (commit,push,open_pr,deploy,delete).
        #[arg(long)]
        scopes: String,
        /// Approver identity recorded and signed into the approval.
        #[arg(long)]
        approver: String,
        #[arg(long, default_value = "MAINTAINER")]
        role: String,
        /// Key id registered in the signing key store.
        #[arg(long)]
        key_id: String,
        /// Path to the base64 ed25519 private key file.
        #[arg(long)]
        key_file: String,
    },
    /// Produce a signed denial file. A reason is mandatory.
    Deny {
        #[arg(long)]
        target: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        approver: String,
        #[arg(long, default_value = "MAINTAINER")]
        role: String,
        #[arg(long)]
        key_id: String,
        #[arg(long)]
        key_file: String,
    },
    /// Produce a signed revocation file for a target.
    Revoke {
        #[arg(long)]
        target: String,
        #[arg(long)]
        approver: String,
        #[arg(long, default_value = "MAINTAINER")]
        role: String,
        #[arg(long)]
        key_id: String,
        #[arg(long)]
        key_file: String,
    },
    /// Verify every approval on file for a run.
    Verify {
        #[arg(long)]
        run: String,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate a keypair: registers the public key, writes the private
    /// key to a file.
    Generate {
        #[arg(long)]
        key_id: String,
        /// Where to write the base64 private key.
        #[arg(long)]
        out: String,
    },
    /// Revoke a registered key.
    Revoke {
        #[arg(long)]
        key_id: String,
    },
    /// List registered keys for the tenant.
    List,
}

#[derive(Subcommand)]
pub enum IdempotencyCommands {
    /// Show the record behind a raw key.
    Status { key: String },
    /// Delete expired records.
    Cleanup,
    /// Print counters in Prometheus text format.
    Metrics,
}
