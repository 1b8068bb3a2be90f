//! Checkpoint and resume-context domain models.
//!
//! Checkpoints form an append-only log per run, ordered by timestamp.
//! Resume contexts are computed from that log when a run restarts
//! mid-pipeline on another worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::StepStatus;

/// Durable snapshot of one step's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_id: String,
    pub agent: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_used: u64,
    pub duration_ms: u64,
    /// May this checkpoint serve as a resume point?
    pub resumable: bool,
    /// May the step be safely replayed?
    pub idempotent: bool,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn completed(step_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            agent: agent.into(),
            status: StepStatus::Completed,
            input: None,
            output: None,
            error: None,
            tokens_used: 0,
            duration_ms: 0,
            resumable: true,
            idempotent: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_flags(mut self, resumable: bool, idempotent: bool) -> Self {
        self.resumable = resumable;
        self.idempotent = idempotent;
        self
    }
}

/// How a resumed run re-enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Skip everything completed up to the last resumable checkpoint,
    /// continue from the step after it.
    FromCheckpoint,
    /// Execute only the named step; it must be idempotent.
    ReplayStep,
}

impl Default for ResumeMode {
    fn default() -> Self {
        Self::FromCheckpoint
    }
}

/// Everything the orchestrator needs to restart a run mid-pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeContext {
    pub mode: ResumeMode,
    /// Step id of the checkpoint resumed from.
    pub resume_step_id: String,
    /// Completed step ids that must not re-execute.
    pub skip_step_ids: Vec<String>,
    /// Output of the resume checkpoint, fed to the first executed phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carry_forward_state: Option<serde_json::Value>,
}

impl ResumeContext {
    /// Build a `from_checkpoint` context from a run's checkpoint log.
    ///
    /// The resume point is the latest completed checkpoint marked
    /// `resumable`. The skip set is every completed step whose timestamp
    /// is at or before that point. Returns `None` when no resumable
    /// checkpoint exists.
    pub fn from_checkpoints(checkpoints: &[Checkpoint]) -> Option<Self> {
        let resume_point = checkpoints
            .iter()
            .filter(|c| c.status == StepStatus::Completed && c.resumable)
            .max_by_key(|c| c.timestamp)?;

        let skip_step_ids = checkpoints
            .iter()
            .filter(|c| c.status == StepStatus::Completed && c.timestamp <= resume_point.timestamp)
            .map(|c| c.step_id.clone())
            .collect();

        Some(Self {
            mode: ResumeMode::FromCheckpoint,
            resume_step_id: resume_point.step_id.clone(),
            skip_step_ids,
            carry_forward_state: resume_point.output.clone(),
        })
    }

    /// Build a `replay_step` context for one idempotent step.
    pub fn replay_step(checkpoint: &Checkpoint) -> Option<Self> {
        if !checkpoint.idempotent {
            return None;
        }
        Some(Self {
            mode: ResumeMode::ReplayStep,
            resume_step_id: checkpoint.step_id.clone(),
            skip_step_ids: Vec::new(),
            carry_forward_state: checkpoint.input.clone(),
        })
    }

    pub fn should_skip(&self, step_id: &str) -> bool {
        match self.mode {
            ResumeMode::FromCheckpoint => self.skip_step_ids.iter().any(|s| s == step_id),
            ResumeMode::ReplayStep => self.resume_step_id != step_id,
        }
    }
}
