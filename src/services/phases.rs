//! Phase definitions and per-run-type pipelines.
//!
//! Step graphs are linear per run type. Each phase reads the run state
//! (a JSON object accumulated across phases, keyed by step id), produces
//! its own output fragment, and declares whether it may be replayed and
//! which approval scopes it needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::error::PhaseError;
use crate::domain::models::approval::Scope;
use crate::domain::models::run::RunType;
use crate::domain::ports::agent::{AgentInvoker, AgentRequest};
use crate::domain::ports::sandbox::{FileChange, Sandbox};
use crate::infrastructure::crypto::content_hash;

pub const STEP_ANALYZE: &str = "analyze";
pub const STEP_PLAN: &str = "plan";
pub const STEP_APPLY: &str = "apply";
pub const STEP_TEST: &str = "test";
pub const STEP_PUBLISH: &str = "publish";

/// Static description of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub id: &'static str,
    /// May the step be safely replayed?
    pub idempotent: bool,
}

const ANALYZE: StepSpec = StepSpec { id: STEP_ANALYZE, idempotent: true };
const PLAN: StepSpec = StepSpec { id: STEP_PLAN, idempotent: true };
const APPLY: StepSpec = StepSpec { id: STEP_APPLY, idempotent: false };
const TEST: StepSpec = StepSpec { id: STEP_TEST, idempotent: true };
const PUBLISH: StepSpec = StepSpec { id: STEP_PUBLISH, idempotent: false };

/// The linear step sequence for a run type.
pub fn pipeline_steps(run_type: RunType) -> &'static [StepSpec] {
    match run_type {
        RunType::Triage => &[ANALYZE],
        RunType::Plan | RunType::Review => &[ANALYZE, PLAN],
        RunType::Resolve => &[ANALYZE, PLAN, APPLY, TEST],
        RunType::Autopilot => &[ANALYZE, PLAN, APPLY, TEST, PUBLISH],
    }
}

pub fn step_spec(run_type: RunType, step_id: &str) -> Option<StepSpec> {
    pipeline_steps(run_type).iter().copied().find(|s| s.id == step_id)
}

/// Hash of the plan the approver saw, from the accumulated run state.
pub fn plan_intent_hash(state: &Value) -> String {
    content_hash(state.get(STEP_PLAN).unwrap_or(&Value::Null))
}

/// Input to one phase execution.
#[derive(Debug, Clone)]
pub struct PhaseInput {
    pub run_id: uuid::Uuid,
    pub tenant_id: String,
    /// Run state accumulated so far, keyed by step id (plus `trigger`).
    pub state: Value,
}

/// What a phase produced.
#[derive(Debug, Clone)]
pub struct PhaseOutput {
    /// This phase's fragment, stored into the state under the step id.
    pub output: Value,
    pub tokens_used: u64,
}

/// One node of the pipeline.
#[async_trait]
pub trait Phase: Send + Sync {
    fn spec(&self) -> StepSpec;

    /// Which agent executes this phase, for checkpoints and step records.
    fn agent_name(&self) -> &'static str;

    /// Approval scopes the phase needs, derived from the current state.
    fn required_scopes(&self, _state: &Value) -> Vec<Scope> {
        Vec::new()
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError>;
}

fn agent_failure(phase: &'static str) -> impl Fn(crate::domain::ports::agent::AgentError) -> PhaseError {
    move |e| PhaseError::Failed {
        phase: phase.to_string(),
        message: e.to_string(),
    }
}

/// Analyze the triggering issue: classification, affected areas,
/// complexity.
pub struct AnalyzePhase {
    agent: Arc<dyn AgentInvoker>,
}

impl AnalyzePhase {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Phase for AnalyzePhase {
    fn spec(&self) -> StepSpec {
        ANALYZE
    }

    fn agent_name(&self) -> &'static str {
        "analyzer"
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError> {
        let response = self
            .agent
            .invoke(AgentRequest {
                run_id: input.run_id,
                tenant_id: input.tenant_id.clone(),
                phase: STEP_ANALYZE.to_string(),
                input: input.state.clone(),
            })
            .await
            .map_err(agent_failure(STEP_ANALYZE))?;

        Ok(PhaseOutput {
            output: response.output,
            tokens_used: response.tokens_used,
        })
    }
}

/// Produce the change plan the approver will sign off on.
pub struct PlanPhase {
    agent: Arc<dyn AgentInvoker>,
}

impl PlanPhase {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Phase for PlanPhase {
    fn spec(&self) -> StepSpec {
        PLAN
    }

    fn agent_name(&self) -> &'static str {
        "planner"
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError> {
        let response = self
            .agent
            .invoke(AgentRequest {
                run_id: input.run_id,
                tenant_id: input.tenant_id.clone(),
                phase: STEP_PLAN.to_string(),
                input: input.state.clone(),
            })
            .await
            .map_err(agent_failure(STEP_PLAN))?;

        Ok(PhaseOutput {
            output: response.output,
            tokens_used: response.tokens_used,
        })
    }
}

/// Write the planned changes into the run workspace. Irreversible from
/// the pipeline's view, hence the commit/push approval requirement.
pub struct ApplyPhase {
    agent: Arc<dyn AgentInvoker>,
    sandbox: Arc<dyn Sandbox>,
}

impl ApplyPhase {
    pub fn new(agent: Arc<dyn AgentInvoker>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { agent, sandbox }
    }
}

#[async_trait]
impl Phase for ApplyPhase {
    fn spec(&self) -> StepSpec {
        APPLY
    }

    fn agent_name(&self) -> &'static str {
        "resolver"
    }

    fn required_scopes(&self, _state: &Value) -> Vec<Scope> {
        vec![Scope::Commit, Scope::Push]
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError> {
        let response = self
            .agent
            .invoke(AgentRequest {
                run_id: input.run_id,
                tenant_id: input.tenant_id.clone(),
                phase: STEP_APPLY.to_string(),
                input: input.state.clone(),
            })
            .await
            .map_err(agent_failure(STEP_APPLY))?;

        let files: Vec<FileChange> = response
            .output
            .get("files")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PhaseError::Failed {
                phase: STEP_APPLY.to_string(),
                message: format!("agent produced a malformed patch: {e}"),
            })?
            .unwrap_or_default();

        if files.is_empty() {
            return Err(PhaseError::Failed {
                phase: STEP_APPLY.to_string(),
                message: "agent produced no file changes to apply".to_string(),
            });
        }

        self.sandbox
            .write_files(input.run_id, &files)
            .await
            .map_err(|e| PhaseError::Failed {
                phase: STEP_APPLY.to_string(),
                message: e.to_string(),
            })?;

        Ok(PhaseOutput {
            output: json!({
                "files_written": files.len(),
                "summary": response.output.get("summary").cloned().unwrap_or(Value::Null),
            }),
            tokens_used: response.tokens_used,
        })
    }
}

/// Run the plan's test command in the workspace. A failing test suite is
/// reported, not fatal; CI re-validates after the PR exists.
pub struct TestPhase {
    sandbox: Arc<dyn Sandbox>,
}

impl TestPhase {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Phase for TestPhase {
    fn spec(&self) -> StepSpec {
        TEST
    }

    fn agent_name(&self) -> &'static str {
        "tester"
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError> {
        let command = input
            .state
            .get(STEP_PLAN)
            .and_then(|plan| plan.get("test_command"))
            .and_then(Value::as_str);

        let Some(command) = command else {
            return Ok(PhaseOutput {
                output: json!({"tests_passed": true, "skipped": true}),
                tokens_used: 0,
            });
        };

        let outcome = self
            .sandbox
            .run_command(
                input.run_id,
                "sh",
                &["-c".to_string(), command.to_string()],
            )
            .await
            .map_err(|e| PhaseError::Failed {
                phase: STEP_TEST.to_string(),
                message: e.to_string(),
            })?;

        Ok(PhaseOutput {
            output: json!({
                "tests_passed": outcome.success(),
                "exit_code": outcome.exit_code,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
            }),
            tokens_used: 0,
        })
    }
}

/// Open the pull request (and perform any declared deploy/delete).
pub struct PublishPhase {
    agent: Arc<dyn AgentInvoker>,
}

impl PublishPhase {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Phase for PublishPhase {
    fn spec(&self) -> StepSpec {
        PUBLISH
    }

    fn agent_name(&self) -> &'static str {
        "publisher"
    }

    fn required_scopes(&self, state: &Value) -> Vec<Scope> {
        let mut scopes = vec![Scope::OpenPr];
        // The plan may declare scopes beyond opening the PR.
        if let Some(declared) = state
            .get(STEP_PLAN)
            .and_then(|plan| plan.get("declared_scopes"))
            .and_then(Value::as_array)
        {
            for name in declared.iter().filter_map(Value::as_str) {
                if let Some(scope @ (Scope::Deploy | Scope::Delete)) = Scope::from_str(name) {
                    if !scopes.contains(&scope) {
                        scopes.push(scope);
                    }
                }
            }
        }
        scopes
    }

    async fn execute(&self, input: &PhaseInput) -> Result<PhaseOutput, PhaseError> {
        let response = self
            .agent
            .invoke(AgentRequest {
                run_id: input.run_id,
                tenant_id: input.tenant_id.clone(),
                phase: STEP_PUBLISH.to_string(),
                input: input.state.clone(),
            })
            .await
            .map_err(agent_failure(STEP_PUBLISH))?;

        Ok(PhaseOutput {
            output: response.output,
            tokens_used: response.tokens_used,
        })
    }
}

/// Build the phase chain for a run type.
pub fn build_pipeline(
    run_type: RunType,
    agent: Arc<dyn AgentInvoker>,
    sandbox: Arc<dyn Sandbox>,
) -> Vec<Arc<dyn Phase>> {
    pipeline_steps(run_type)
        .iter()
        .map(|spec| -> Arc<dyn Phase> {
            match spec.id {
                STEP_ANALYZE => Arc::new(AnalyzePhase::new(Arc::clone(&agent))),
                STEP_PLAN => Arc::new(PlanPhase::new(Arc::clone(&agent))),
                STEP_APPLY => Arc::new(ApplyPhase::new(Arc::clone(&agent), Arc::clone(&sandbox))),
                STEP_TEST => Arc::new(TestPhase::new(Arc::clone(&sandbox))),
                STEP_PUBLISH => Arc::new(PublishPhase::new(Arc::clone(&agent))),
                other => unreachable!("unknown step id {other}"),
            }
        })
        .collect()
}
