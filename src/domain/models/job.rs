//! Durable job domain model.
//!
//! Jobs are claim-and-lease work items. A worker claims a pending job,
//! runs it, and settles it; failed jobs re-enter the queue while the
//! attempt budget allows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a durable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::Claimed],
            Self::Claimed => &[Self::Running],
            Self::Running => &[Self::Completed, Self::Failed, Self::DeadLetter],
            // Failed jobs re-enter the queue while attempts < max_retries.
            Self::Failed => &[Self::Pending],
            Self::Completed | Self::DeadLetter => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known job types carried on the queue.
pub mod job_types {
    /// Execute a run's pipeline from the start.
    pub const EXECUTE_RUN: &str = "execute_run";
    /// Resume a run mid-pipeline; the payload carries a `ResumeContext`.
    pub const RESUME_RUN: &str = "resume_run";
}

/// A claim-and-lease work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableJob {
    pub id: Uuid,
    pub job_type: String,
    pub tenant_id: String,
    pub run_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub priority: i32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DurableJob {
    pub fn new(
        job_type: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            tenant_id: tenant_id.into(),
            run_id: None,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_retries: 3,
            priority: 0,
            claimed_by: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether a failure should send the job back to the queue.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Claimed));
        assert!(JobStatus::Claimed.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::DeadLetter));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));

        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::DeadLetter.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn retry_budget() {
        let mut job = DurableJob::new(job_types::EXECUTE_RUN, "t-1", json!({}));
        job.max_retries = 2;
        assert!(job.can_retry());
        job.attempts = 2;
        assert!(!job.can_retry());
    }
}
