use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error from an agent invocation.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent invocation failed in {phase}: {message}")]
    InvocationFailed { phase: String, message: String },

    #[error("Agent returned malformed output for {phase}: {message}")]
    MalformedOutput { phase: String, message: String },
}

/// Request handed to an agent for one phase of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub run_id: Uuid,
    pub tenant_id: String,
    /// Phase asking for the work (`analyze`, `plan`, ...).
    pub phase: String,
    pub input: serde_json::Value,
}

/// What an agent produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub output: serde_json::Value,
    pub tokens_used: u64,
}

/// The AI side of the system.
///
/// The core only depends on this interface; plans and patches come from
/// whatever implements it. Timeouts are enforced by the orchestrator,
/// not the invoker.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}
