//! Domain models for the durable execution core.

pub mod approval;
pub mod checkpoint;
pub mod config;
pub mod event_key;
pub mod idempotency;
pub mod job;
pub mod policy;
pub mod run;

pub use approval::{
    ApprovalDecision, ApprovalTarget, Approver, ApproverRole, Scope, SignedApproval,
    SigningKeyRecord,
};
pub use checkpoint::{Checkpoint, ResumeContext, ResumeMode};
pub use config::{Config, StoreBackend};
pub use event_key::{EventKey, EventSource};
pub use idempotency::{CachedResponse, CheckOutcome, IdempotencyRecord, IdempotencyStatus};
pub use job::{job_types, DurableJob, JobStatus};
pub use policy::{PolicyAction, PolicyContext, PolicyDecision, PolicyPriority, PolicyResource};
pub use run::{Run, RunStatus, RunStep, RunTrigger, RunType, StepStatus};
