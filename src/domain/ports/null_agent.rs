//! Null agent invoker.
//!
//! Wired when no agent backend is configured. Every invocation fails
//! with a clear message instead of silently producing empty work.

use async_trait::async_trait;

use super::agent::{AgentError, AgentInvoker, AgentRequest, AgentResponse};

#[derive(Default)]
pub struct NullAgentInvoker;

impl NullAgentInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentInvoker for NullAgentInvoker {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        Err(AgentError::InvocationFailed {
            phase: request.phase,
            message: "no agent backend configured".to_string(),
        })
    }
}
