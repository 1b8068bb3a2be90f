//! Configuration model.
//!
//! Loaded hierarchically by `infrastructure::config::ConfigLoader`:
//! defaults, then `.gwi/config.yaml`, then `.gwi/local.yaml`, then
//! `GWI_*` environment variables.

use serde::{Deserialize, Serialize};

/// Which store implementations back the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-memory stores; nothing survives a restart. Test/dev only.
    Memory,
    /// SQLite via sqlx, WAL mode.
    Sqlite,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Sqlite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database path (ignored for the memory backend).
    pub path: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: ".gwi/gwi.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a processing lock is honored before recovery is allowed.
    pub lock_timeout_ms: u64,
    /// Lock recoveries permitted before the key is force-failed.
    pub max_attempts: u32,
    /// TTL for completed records.
    pub completed_ttl_ms: u64,
    /// TTL for failed records; shorter so legitimate retries can land.
    pub failed_ttl_ms: u64,
    /// `Retry-After` seconds returned on concurrent duplicates.
    pub conflict_retry_after_secs: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 60_000,
            max_attempts: 3,
            completed_ttl_ms: 24 * 60 * 60 * 1000,
            failed_ttl_ms: 60 * 60 * 1000,
            conflict_retry_after_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-phase agent budget.
    pub phase_budget_secs: u64,
    /// When true, a failed test phase fails the run instead of
    /// annotating the publish input.
    pub fail_run_on_test_failure: bool,
    /// Whether destructive phases demand signed approvals.
    pub require_approval: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            phase_budget_secs: 300,
            fail_run_on_test_failure: false,
            require_approval: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Heartbeats older than this mark a run as orphaned.
    pub stale_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            stale_threshold_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Cap on orphans handled in one startup pass.
    pub max_runs: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { max_runs: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    /// Directory scanned for signed approval files.
    pub dir: String,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            dir: ".gwi/approvals".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// When false, the apply phase refuses to run.
    pub enabled: bool,
    /// Root directory for per-run workspaces.
    pub workspace_root: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace_root: ".gwi/workspaces".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Methods subject to idempotency handling.
    pub idempotent_methods: Vec<String>,
    /// Paths exempt from idempotency handling.
    pub skip_paths: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            idempotent_methods: vec![
                "POST".to_string(),
                "PUT".to_string(),
                "PATCH".to_string(),
            ],
            skip_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Delay between empty queue polls.
    pub poll_interval_ms: u64,
    pub tenant_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            tenant_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, logs also go to a rolling file under this directory.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub idempotency: IdempotencyConfig,
    pub orchestrator: OrchestratorConfig,
    pub heartbeat: HeartbeatConfig,
    pub recovery: RecoveryConfig,
    pub approvals: ApprovalsConfig,
    pub sandbox: SandboxConfig,
    pub http: HttpConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
    pub retry: RetryConfig,
}
