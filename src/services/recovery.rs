//! Startup recovery.
//!
//! On worker startup, every orphaned run (running under some worker,
//! heartbeat gone stale) is brought to a safe state exactly once:
//! resumed from its checkpoint log, or failed with a precise reason.
//! Pending runs stay on the queue untouched; they have no owner to
//! lose. A run whose resume
//! action itself fails is force-failed rather than left for the next
//! instance; terminality is what prevents recovery loops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{RecoveryError, StoreError};
use crate::domain::models::checkpoint::ResumeContext;
use crate::domain::models::config::RecoveryConfig;
use crate::domain::models::job::{job_types, DurableJob};
use crate::domain::models::run::{Run, RunStatus};
use crate::domain::ports::checkpoint_store::CheckpointStore;
use crate::domain::ports::job_queue::JobQueue;
use crate::domain::ports::run_repository::RunRepository;

use super::heartbeat::HeartbeatService;
use super::phases::step_spec;

/// What recovery decided for one orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Resumed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecoveryReport {
    pub run_id: Uuid,
    pub action: RecoveryAction,
    pub reason: String,
}

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    pub orphaned_count: usize,
    pub resumed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub runs: Vec<RunRecoveryReport>,
    pub duration_ms: u64,
    pub owner_id: String,
}

enum Verdict {
    Skip(String),
    Fail(String),
    Resume(ResumeContext),
}

pub struct RecoveryOrchestrator {
    run_repo: Arc<dyn RunRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Arc<dyn JobQueue>,
    heartbeat: Arc<HeartbeatService>,
    config: RecoveryConfig,
}

impl RecoveryOrchestrator {
    pub fn new(
        run_repo: Arc<dyn RunRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        queue: Arc<dyn JobQueue>,
        heartbeat: Arc<HeartbeatService>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            run_repo,
            checkpoints,
            queue,
            heartbeat,
            config,
        }
    }

    /// One recovery pass over all orphans, capped at `max_runs`.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoverySummary, StoreError> {
        let started = std::time::Instant::now();
        let owner_id = self.heartbeat.owner_id().to_string();

        let orphans = self
            .heartbeat
            .list_orphaned_runs(self.heartbeat.stale_threshold())
            .await?;
        let orphaned_count = orphans.len();
        if orphaned_count > self.config.max_runs {
            warn!(
                orphans = orphaned_count,
                cap = self.config.max_runs,
                "more orphans than the recovery cap; the rest wait for the next pass"
            );
        }

        let mut summary = RecoverySummary {
            orphaned_count,
            resumed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            error_count: 0,
            runs: Vec::new(),
            duration_ms: 0,
            owner_id: owner_id.clone(),
        };

        for run in orphans.into_iter().take(self.config.max_runs) {
            let run_id = run.id;
            match self.recover_one(run).await {
                Ok(report) => {
                    match report.action {
                        RecoveryAction::Resumed => summary.resumed_count += 1,
                        RecoveryAction::Failed => summary.failed_count += 1,
                        RecoveryAction::Skipped => summary.skipped_count += 1,
                    }
                    summary.runs.push(report);
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "recovery errored for run");
                    summary.error_count += 1;
                    summary.runs.push(RunRecoveryReport {
                        run_id,
                        action: RecoveryAction::Failed,
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            orphaned = summary.orphaned_count,
            resumed = summary.resumed_count,
            failed = summary.failed_count,
            skipped = summary.skipped_count,
            errors = summary.error_count,
            duration_ms = summary.duration_ms,
            "recovery pass finished"
        );
        Ok(summary)
    }

    async fn recover_one(&self, run: Run) -> Result<RunRecoveryReport, StoreError> {
        let verdict = self.decide(&run).await?;

        match verdict {
            Verdict::Skip(reason) => Ok(RunRecoveryReport {
                run_id: run.id,
                action: RecoveryAction::Skipped,
                reason,
            }),
            Verdict::Fail(reason) => {
                let run_id = run.id;
                self.fail_orphan(run, &reason).await?;
                Ok(RunRecoveryReport {
                    run_id,
                    action: RecoveryAction::Failed,
                    reason,
                })
            }
            Verdict::Resume(ctx) => {
                let run_id = run.id;
                let resume_step = ctx.resume_step_id.clone();
                match self.resume_orphan(run, ctx).await {
                    Ok(()) => Ok(RunRecoveryReport {
                        run_id,
                        action: RecoveryAction::Resumed,
                        reason: format!("resumed from checkpoint '{resume_step}'"),
                    }),
                    Err(RecoveryError::ResumeActionFailed(message)) => {
                        // Resume itself failed. The run is force-failed so
                        // no later instance tries again.
                        let reason = format!("resume action failed: {message}");
                        let run = self
                            .run_repo
                            .get(run_id)
                            .await?
                            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
                        self.fail_orphan(run, &reason).await?;
                        Ok(RunRecoveryReport {
                            run_id,
                            action: RecoveryAction::Failed,
                            reason,
                        })
                    }
                    Err(RecoveryError::Store(e)) => Err(e),
                }
            }
        }
    }

    /// The per-orphan decision tree.
    async fn decide(&self, run: &Run) -> Result<Verdict, StoreError> {
        if matches!(run.status, RunStatus::Completed | RunStatus::Cancelled) {
            return Ok(Verdict::Skip(format!(
                "run is already terminal ({})",
                run.status
            )));
        }

        let checkpoints = self.checkpoints.list(run.id).await?;
        if checkpoints.is_empty() {
            return Ok(Verdict::Fail("No checkpoints saved".to_string()));
        }

        let latest = checkpoints
            .iter()
            .filter(|c| c.status == crate::domain::models::run::StepStatus::Completed)
            .max_by_key(|c| c.timestamp);
        match latest {
            None => return Ok(Verdict::Fail("No resumable checkpoint found".to_string())),
            Some(latest) if !latest.resumable => {
                return Ok(Verdict::Fail("No resumable checkpoint found".to_string()));
            }
            Some(_) => {}
        }

        // A non-idempotent step that started without completing may have
        // already produced side effects; replaying it is unsafe.
        if let Some(current_step) = &run.current_step {
            let checkpointed = checkpoints
                .iter()
                .any(|c| &c.step_id == current_step);
            let spec = step_spec(run.run_type, current_step);
            if let Some(spec) = spec {
                if !spec.idempotent && !checkpointed {
                    return Ok(Verdict::Fail(format!(
                        "No resumable checkpoint: non-idempotent step '{current_step}' was \
                         already started"
                    )));
                }
            }
        }

        match ResumeContext::from_checkpoints(&checkpoints) {
            Some(ctx) => Ok(Verdict::Resume(ctx)),
            None => Ok(Verdict::Fail("No resumable checkpoint found".to_string())),
        }
    }

    /// Take ownership, restamp the heartbeat, and hand the run back to
    /// the queue with its resume context.
    async fn resume_orphan(&self, mut run: Run, ctx: ResumeContext) -> Result<(), RecoveryError> {
        let owner_id = self.heartbeat.owner_id().to_string();

        run.status = RunStatus::Running;
        run.owner_id = Some(owner_id.clone());
        run.last_heartbeat_at = Some(Utc::now());
        run.resume_count += 1;
        self.run_repo.update(&run).await?;

        if let Err(e) = self.heartbeat.start_heartbeat(&run.tenant_id, run.id) {
            return Err(RecoveryError::ResumeActionFailed(e.to_string()));
        }

        let payload = serde_json::to_value(&ctx)
            .map_err(|e| RecoveryError::ResumeActionFailed(e.to_string()))?;
        let job = DurableJob::new(
            job_types::RESUME_RUN,
            run.tenant_id.clone(),
            json!({"resume_context": payload}),
        )
        .for_run(run.id);

        if let Err(e) = self.queue.enqueue(&job).await {
            self.heartbeat.stop_heartbeat(run.id);
            return Err(RecoveryError::ResumeActionFailed(e.to_string()));
        }

        info!(
            run_id = %run.id,
            resume_step = %ctx.resume_step_id,
            owner_id = %owner_id,
            "orphan re-enqueued for resume"
        );
        Ok(())
    }

    /// Force-fail an orphan with a diagnostic naming both owners.
    async fn fail_orphan(&self, mut run: Run, reason: &str) -> Result<(), StoreError> {
        let diagnostic = orphan_diagnostic(
            reason,
            run.owner_id.as_deref(),
            run.last_heartbeat_at,
            self.heartbeat.owner_id(),
        );

        run.status = RunStatus::Failed;
        run.error = Some(diagnostic.clone());
        run.completed_at = Some(Utc::now());
        self.run_repo.update(&run).await?;

        warn!(run_id = %run.id, reason = %diagnostic, "orphan failed by recovery");
        Ok(())
    }
}

fn orphan_diagnostic(
    reason: &str,
    previous_owner: Option<&str>,
    last_heartbeat: Option<DateTime<Utc>>,
    recovering_owner: &str,
) -> String {
    format!(
        "{reason} (previous owner: {}, last heartbeat: {}, recovered by: {recovering_owner})",
        previous_owner.unwrap_or("unknown"),
        last_heartbeat
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_names_both_owners() {
        let diag = orphan_diagnostic(
            "No checkpoints saved",
            Some("worker-a"),
            None,
            "worker-b",
        );
        assert!(diag.contains("No checkpoints saved"));
        assert!(diag.contains("worker-a"));
        assert!(diag.contains("worker-b"));
        assert!(diag.contains("never"));
    }
}
