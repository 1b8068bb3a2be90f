//! Test doubles and builders shared across integration suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use gwi::domain::models::approval::{
    ApprovalDecision, ApprovalTarget, Approver, ApproverRole, Scope, SignedApproval,
};
use gwi::domain::models::event_key::EventKey;
use gwi::domain::models::run::{Run, RunStatus, RunTrigger, RunType};
use gwi::domain::ports::agent::{AgentError, AgentInvoker, AgentRequest, AgentResponse};
use gwi::domain::ports::sandbox::{CommandOutcome, FileChange, Sandbox, SandboxError};

/// Agent returning canned outputs per phase, recording every call.
#[allow(dead_code)]
pub struct ScriptedAgent {
    outputs: HashMap<String, Value>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_phase(mut self, phase: &str, output: Value) -> Self {
        self.outputs.insert(phase.to_string(), output);
        self
    }

    /// Canned outputs for a full autopilot pipeline. The plan carries
    /// `test_command` and file changes for apply.
    pub fn autopilot(plan: Value) -> Self {
        Self::new()
            .with_phase("analyze", json!({"classification": "bug", "complexity": "low"}))
            .with_phase("plan", plan)
            .with_phase(
                "apply",
                json!({
                    "files": [{"path": "src/fix.rs", "contents": "pub fn fixed() {}\n"}],
                    "summary": "apply the planned fix",
                }),
            )
            .with_phase("publish", json!({"pr_url": "https://github.com/org/repo/pull/7"}))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self, phase: &str) -> usize {
        self.calls().iter().filter(|p| p.as_str() == phase).count()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.phase.clone());
        match self.outputs.get(&request.phase) {
            Some(output) => Ok(AgentResponse {
                output: output.clone(),
                tokens_used: 17,
            }),
            None => Err(AgentError::InvocationFailed {
                phase: request.phase,
                message: "no scripted output".to_string(),
            }),
        }
    }
}

/// Sandbox that records writes and returns a fixed exit code.
#[allow(dead_code)]
pub struct RecordingSandbox {
    pub writes: Mutex<Vec<(Uuid, Vec<FileChange>)>>,
    pub exit_code: i32,
}

#[allow(dead_code)]
impl RecordingSandbox {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            exit_code: 0,
        }
    }

    pub fn failing_tests() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            exit_code: 1,
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().expect("writes lock").len()
    }
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    async fn write_files(&self, run_id: Uuid, files: &[FileChange]) -> Result<(), SandboxError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((run_id, files.to_vec()));
        Ok(())
    }

    async fn run_command(
        &self,
        _run_id: Uuid,
        _program: &str,
        _args: &[String],
    ) -> Result<CommandOutcome, SandboxError> {
        Ok(CommandOutcome {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: if self.exit_code == 0 {
                String::new()
            } else {
                "assertion failed".to_string()
            },
        })
    }
}

#[allow(dead_code)]
pub fn test_trigger(actor_id: &str) -> RunTrigger {
    RunTrigger {
        event_key: EventKey::Api {
            client_id: "test-client".to_string(),
            request_id: Uuid::new_v4().to_string(),
        },
        actor_id: actor_id.to_string(),
        issue: Some("#42".to_string()),
        repository: Some("org/repo".to_string()),
    }
}

#[allow(dead_code)]
pub fn pending_run(tenant: &str, run_type: RunType, actor_id: &str) -> Run {
    Run::new(tenant, run_type, test_trigger(actor_id))
}

#[allow(dead_code)]
pub fn running_run(tenant: &str, run_type: RunType, actor_id: &str) -> Run {
    let mut run = pending_run(tenant, run_type, actor_id);
    run.status = RunStatus::Running;
    run
}

/// Unsigned approval skeleton; sign it with `sign_approval` before use.
#[allow(dead_code)]
pub fn approval_skeleton(
    run_id: Uuid,
    approver_id: &str,
    role: ApproverRole,
    scopes: Vec<Scope>,
    intent_hash: &str,
    key_id: &str,
) -> SignedApproval {
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
        target: ApprovalTarget::Run { run_id },
        intent_hash: intent_hash.to_string(),
        reason: None,
        source: "test".to_string(),
        signing_key_id: key_id.to_string(),
        signature: String::new(),
        created_at: Utc::now(),
        expires_at: None,
    }
}
