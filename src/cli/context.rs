//! Service wiring for the CLI and the worker.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::domain::models::config::{Config, StoreBackend};
use crate::domain::ports::{
    AgentInvoker, ApprovalSource, CheckpointStore, IdempotencyStore, JobQueue, NullAgentInvoker,
    RunRepository, Sandbox, SigningKeyStore,
};
use crate::infrastructure::approvals::FsApprovalSource;
use crate::infrastructure::database::{
    DatabaseConnection, SqliteCheckpointStore, SqliteIdempotencyStore, SqliteJobQueue,
    SqliteRunRepository, SqliteSigningKeyStore,
};
use crate::infrastructure::memory::{
    MemoryCheckpointStore, MemoryIdempotencyStore, MemoryJobQueue, MemoryRunRepository,
    MemorySigningKeyStore,
};
use crate::infrastructure::sandbox::SubprocessSandbox;
use crate::services::{
    ApprovalGate, HeartbeatService, IdempotencyMetrics, IdempotencyService, PolicyEngine,
    RecoveryOrchestrator, RunOrchestrator, Worker,
};

/// Everything wired against the configured backend.
pub struct AppContext {
    pub config: Config,
    pub run_repo: Arc<dyn RunRepository>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub idempotency_store: Arc<dyn IdempotencyStore>,
    pub queue: Arc<dyn JobQueue>,
    pub key_store: Arc<dyn SigningKeyStore>,
    pub approval_source: Arc<dyn ApprovalSource>,
    pub idempotency: Arc<IdempotencyService>,
    pub heartbeat: Arc<HeartbeatService>,
    pub gate: Arc<ApprovalGate>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub recovery: Arc<RecoveryOrchestrator>,
    /// Held for the lifetime of the context; dropping it closes the pool.
    db: Option<DatabaseConnection>,
}

impl AppContext {
    /// Wire all services. Fatal on a misconfigured or unreachable
    /// backend; the worker refuses to serve.
    pub async fn init(config: Config) -> Result<Self> {
        let (run_repo, checkpoints, idempotency_store, queue, key_store, db) =
            match config.store.backend {
                StoreBackend::Sqlite => {
                    let url = format!("sqlite:{}", config.store.path);
                    let db = DatabaseConnection::with_max_connections(
                        &url,
                        config.store.max_connections,
                    )
                    .await
                    .context("Failed to connect to the store")?;
                    db.migrate().await.context("Failed to run migrations")?;

                    let pool = db.pool().clone();
                    (
                        Arc::new(SqliteRunRepository::new(pool.clone())) as Arc<dyn RunRepository>,
                        Arc::new(SqliteCheckpointStore::new(pool.clone()))
                            as Arc<dyn CheckpointStore>,
                        Arc::new(SqliteIdempotencyStore::new(pool.clone()))
                            as Arc<dyn IdempotencyStore>,
                        Arc::new(SqliteJobQueue::new(pool.clone())) as Arc<dyn JobQueue>,
                        Arc::new(SqliteSigningKeyStore::new(pool)) as Arc<dyn SigningKeyStore>,
                        Some(db),
                    )
                }
                StoreBackend::Memory => (
                    Arc::new(MemoryRunRepository::new()) as Arc<dyn RunRepository>,
                    Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
                    Arc::new(MemoryIdempotencyStore::new()) as Arc<dyn IdempotencyStore>,
                    Arc::new(MemoryJobQueue::new()) as Arc<dyn JobQueue>,
                    Arc::new(MemorySigningKeyStore::new()) as Arc<dyn SigningKeyStore>,
                    None,
                ),
            };

        let metrics = Arc::new(
            IdempotencyMetrics::new().context("Failed to build the metrics registry")?,
        );
        let idempotency = Arc::new(IdempotencyService::new(
            Arc::clone(&idempotency_store),
            config.idempotency.clone(),
            metrics,
        ));

        let approval_source: Arc<dyn ApprovalSource> =
            Arc::new(FsApprovalSource::new(config.approvals.dir.clone()));
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&approval_source),
            Arc::clone(&key_store),
            PolicyEngine::with_builtin_rules(),
        ));

        let heartbeat = Arc::new(HeartbeatService::new(
            Arc::clone(&run_repo),
            config.heartbeat.clone(),
        ));

        let agent: Arc<dyn AgentInvoker> = Arc::new(NullAgentInvoker::new());
        let sandbox: Arc<dyn Sandbox> =
            Arc::new(SubprocessSandbox::new(config.sandbox.clone()));

        let orchestrator = Arc::new(RunOrchestrator::new(
            Arc::clone(&run_repo),
            Arc::clone(&checkpoints),
            Arc::clone(&gate),
            Arc::clone(&heartbeat),
            agent,
            sandbox,
            config.orchestrator.clone(),
            config.retry.clone(),
        ));

        let recovery = Arc::new(RecoveryOrchestrator::new(
            Arc::clone(&run_repo),
            Arc::clone(&checkpoints),
            Arc::clone(&queue),
            Arc::clone(&heartbeat),
            config.recovery.clone(),
        ));

        Ok(Self {
            config,
            run_repo,
            checkpoints,
            idempotency_store,
            queue,
            key_store,
            approval_source,
            idempotency,
            heartbeat,
            gate,
            orchestrator,
            recovery,
            db,
        })
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.recovery),
            Arc::clone(&self.heartbeat),
            self.config.worker.clone(),
        )
    }

    pub async fn close(self) {
        if let Some(db) = self.db {
            db.close().await;
        }
    }
}
