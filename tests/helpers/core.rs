//! Fully-wired core over in-memory stores for integration tests.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use tempfile::TempDir;

use gwi::domain::models::approval::{SignedApproval, SigningKeyRecord};
use gwi::domain::models::config::{
    HeartbeatConfig, OrchestratorConfig, RecoveryConfig, RetryConfig,
};
use gwi::domain::ports::{
    AgentInvoker, ApprovalSource, CheckpointStore, JobQueue, RunRepository, Sandbox,
    SigningKeyStore,
};
use gwi::infrastructure::approvals::FsApprovalSource;
use gwi::infrastructure::crypto::{encode_public_key, generate_keypair, sign_approval};
use gwi::infrastructure::memory::{
    MemoryCheckpointStore, MemoryJobQueue, MemoryRunRepository, MemorySigningKeyStore,
};
use gwi::services::{
    ApprovalGate, HeartbeatService, PolicyEngine, RecoveryOrchestrator, RunOrchestrator,
};

use super::fixtures::{RecordingSandbox, ScriptedAgent};

#[allow(dead_code)]
pub const TEST_KEY_ID: &str = "k-test";

#[allow(dead_code)]
pub struct TestCore {
    pub run_repo: Arc<MemoryRunRepository>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub key_store: Arc<MemorySigningKeyStore>,
    pub heartbeat: Arc<HeartbeatService>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub recovery: Arc<RecoveryOrchestrator>,
    pub agent: Arc<ScriptedAgent>,
    pub sandbox: Arc<RecordingSandbox>,
    pub signing_key: SigningKey,
    approvals_dir: TempDir,
}

#[allow(dead_code)]
impl TestCore {
    pub async fn new(agent: ScriptedAgent, sandbox: RecordingSandbox) -> Self {
        Self::with_config(agent, sandbox, OrchestratorConfig::default()).await
    }

    pub async fn with_config(
        agent: ScriptedAgent,
        sandbox: RecordingSandbox,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        let run_repo = Arc::new(MemoryRunRepository::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::for_tests());
        let queue = Arc::new(MemoryJobQueue::new());
        let key_store = Arc::new(MemorySigningKeyStore::new());
        let agent = Arc::new(agent);
        let sandbox = Arc::new(sandbox);

        let approvals_dir = TempDir::new().expect("approvals tempdir");
        let approval_source: Arc<dyn ApprovalSource> =
            Arc::new(FsApprovalSource::new(approvals_dir.path()));

        let (signing_key, verifying_key) = generate_keypair();
        key_store
            .register(&SigningKeyRecord {
                key_id: TEST_KEY_ID.to_string(),
                tenant_id: "t-1".to_string(),
                algorithm: SigningKeyRecord::ALGORITHM_ED25519.to_string(),
                public_key: encode_public_key(&verifying_key),
                revoked: false,
                created_at: Utc::now(),
                revoked_at: None,
            })
            .await
            .expect("register test key");

        let gate = Arc::new(ApprovalGate::new(
            approval_source,
            Arc::clone(&key_store) as Arc<dyn SigningKeyStore>,
            PolicyEngine::with_builtin_rules(),
        ));

        let heartbeat = Arc::new(HeartbeatService::new(
            Arc::clone(&run_repo) as Arc<dyn RunRepository>,
            HeartbeatConfig {
                interval_ms: 20,
                stale_threshold_ms: 200,
            },
        ));

        let orchestrator = Arc::new(RunOrchestrator::new(
            Arc::clone(&run_repo) as Arc<dyn RunRepository>,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&gate),
            Arc::clone(&heartbeat),
            Arc::clone(&agent) as Arc<dyn AgentInvoker>,
            Arc::clone(&sandbox) as Arc<dyn Sandbox>,
            orchestrator_config,
            RetryConfig {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
        ));

        let recovery = Arc::new(RecoveryOrchestrator::new(
            Arc::clone(&run_repo) as Arc<dyn RunRepository>,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&queue) as Arc<dyn JobQueue>,
            Arc::clone(&heartbeat),
            RecoveryConfig { max_runs: 50 },
        ));

        Self {
            run_repo,
            checkpoints,
            queue,
            key_store,
            heartbeat,
            orchestrator,
            recovery,
            agent,
            sandbox,
            signing_key,
            approvals_dir,
        }
    }

    /// Sign an approval with the registered test key and drop it into
    /// the approval directory.
    pub fn sign_and_write(&self, mut approval: SignedApproval) -> SignedApproval {
        sign_approval(&mut approval, &self.signing_key);
        self.write_raw(&approval);
        approval
    }

    /// Write an approval document as-is (e.g. after tampering).
    pub fn write_raw(&self, approval: &SignedApproval) {
        let path = self
            .approvals_dir
            .path()
            .join(FsApprovalSource::file_name(approval.approval_id));
        std::fs::write(path, serde_json::to_string_pretty(approval).expect("serialize"))
            .expect("write approval");
    }
}
