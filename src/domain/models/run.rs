//! Run domain model.
//!
//! A run is one end-to-end execution of a pipeline, driven phase by phase
//! by the orchestrator of the worker that owns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event_key::EventKey;

/// What kind of pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Triage,
    Plan,
    Resolve,
    Review,
    Autopilot,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Plan => "plan",
            Self::Resolve => "resolve",
            Self::Review => "review",
            Self::Autopilot => "autopilot",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "triage" => Some(Self::Triage),
            "plan" => Some(Self::Plan),
            "resolve" => Some(Self::Resolve),
            "review" => Some(Self::Review),
            "autopilot" => Some(Self::Autopilot),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses never transition back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    pub fn valid_transitions(&self) -> &'static [RunStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed (or skipped) step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub step_id: String,
    /// Which agent executed the step.
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
}

/// What triggered the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrigger {
    pub event_key: EventKey,
    /// The actor on whose behalf the run executes (e.g. issue author).
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// A long-lived record of one end-to-end execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: String,
    pub run_type: RunType,
    pub status: RunStatus,
    pub current_step: Option<String>,
    pub steps: Vec<RunStep>,
    /// Worker instance currently claiming this run.
    pub owner_id: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub resume_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub trigger: RunTrigger,
}

impl Run {
    pub fn new(tenant_id: impl Into<String>, run_type: RunType, trigger: RunTrigger) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            run_type,
            status: RunStatus::Pending,
            current_step: None,
            steps: Vec::new(),
            owner_id: None,
            last_heartbeat_at: None,
            resume_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            duration_ms: None,
            error: None,
            result: None,
            trigger,
        }
    }

    /// Whether the heartbeat is older than `now - stale_threshold`.
    ///
    /// A run with no heartbeat at all counts as stale: for a running run
    /// that means its worker died before the first stamp. Callers decide
    /// whether staleness matters; a pending run has no owner to be stale.
    pub fn heartbeat_is_stale(&self, now: DateTime<Utc>, stale_threshold: chrono::Duration) -> bool {
        match self.last_heartbeat_at {
            Some(hb) => hb < now - stale_threshold,
            None => true,
        }
    }
}
