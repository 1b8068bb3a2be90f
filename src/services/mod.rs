//! Services: the durable execution core's business logic.

pub mod approval_gate;
pub mod commands;
pub mod heartbeat;
pub mod idempotency;
pub mod metrics;
pub mod orchestrator;
pub mod phases;
pub mod policy;
pub mod recovery;
pub mod retry;
pub mod worker;

pub use approval_gate::{ApprovalGate, GateError, GateRequest};
pub use commands::{parse_command, ApprovalCommand};
pub use heartbeat::{HeartbeatError, HeartbeatService};
pub use idempotency::{IdempotencyService, ProcessOutcome};
pub use metrics::IdempotencyMetrics;
pub use orchestrator::RunOrchestrator;
pub use policy::{PolicyEngine, PolicyRule};
pub use recovery::{RecoveryAction, RecoveryOrchestrator, RecoverySummary};
pub use worker::Worker;
