//! Worker loop.
//!
//! A worker runs startup recovery once, then claims durable jobs and
//! drives each claimed run through the orchestrator. Failed jobs go
//! back to the queue while their attempt budget allows; a job whose
//! payload cannot even be decoded goes to the dead-letter state.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument, warn};

use self::cancellation::CancellationFlag;

use crate::domain::error::StoreError;
use crate::domain::models::checkpoint::ResumeContext;
use crate::domain::models::config::WorkerConfig;
use crate::domain::models::job::{job_types, DurableJob, JobStatus};
use crate::domain::ports::job_queue::JobQueue;

use super::heartbeat::HeartbeatService;
use super::orchestrator::RunOrchestrator;
use super::recovery::{RecoveryOrchestrator, RecoverySummary};

/// Cancellation flag shared between the claim loop and `stop()`.
mod cancellation {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct CancellationFlag(Arc<AtomicBool>);

    impl CancellationFlag {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::SeqCst);
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<RunOrchestrator>,
    recovery: Arc<RecoveryOrchestrator>,
    heartbeat: Arc<HeartbeatService>,
    config: WorkerConfig,
    stop: CancellationFlag,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<RunOrchestrator>,
        recovery: Arc<RecoveryOrchestrator>,
        heartbeat: Arc<HeartbeatService>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            recovery,
            heartbeat,
            config,
            stop: CancellationFlag::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        self.heartbeat.owner_id()
    }

    /// Request a graceful stop; the loop exits after the current job.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Startup recovery pass. Runs before the first claim.
    pub async fn recover(&self) -> Result<RecoverySummary, StoreError> {
        self.recovery.recover().await
    }

    /// Claim and execute jobs until stopped.
    #[instrument(skip(self), fields(owner_id = %self.owner_id()))]
    pub async fn run_loop(&self) -> Result<(), StoreError> {
        info!("worker loop started");
        let poll_interval = std::time::Duration::from_millis(self.config.poll_interval_ms);

        while !self.stop.is_cancelled() {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(poll_interval).await,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "transient store error in worker loop");
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.heartbeat.shutdown();
        info!("worker loop stopped");
        Ok(())
    }

    /// Claim and execute at most one job. Returns whether a job was
    /// claimed.
    pub async fn run_once(&self) -> Result<bool, StoreError> {
        let job = self
            .queue
            .claim(
                self.owner_id(),
                &[job_types::EXECUTE_RUN, job_types::RESUME_RUN],
            )
            .await?;

        let Some(job) = job else {
            return Ok(false);
        };

        self.execute_job(job).await?;
        Ok(true)
    }

    async fn execute_job(&self, job: DurableJob) -> Result<(), StoreError> {
        info!(job_id = %job.id, job_type = %job.job_type, "job claimed");
        self.queue.start(job.id).await?;

        let Some(run_id) = job.run_id else {
            // Without a run id there is nothing to retry against.
            self.queue
                .to_dead_letter(job.id, "job carries no run_id")
                .await?;
            return Ok(());
        };

        let resume = match decode_resume_context(&job) {
            Ok(resume) => resume,
            Err(message) => {
                error!(job_id = %job.id, error = %message, "job payload is malformed");
                self.queue.to_dead_letter(job.id, &message).await?;
                return Ok(());
            }
        };

        match self.orchestrator.execute(run_id, resume).await {
            Ok(run) => {
                self.queue
                    .complete(job.id, Some(serde_json::json!({"status": run.status})))
                    .await?;
                Ok(())
            }
            Err(e) => {
                let status = self.queue.fail(job.id, &e.to_string()).await?;
                if status == JobStatus::Pending {
                    warn!(job_id = %job.id, error = %e, "job failed, requeued");
                } else {
                    error!(job_id = %job.id, error = %e, "job failed permanently");
                }
                Ok(())
            }
        }
    }
}

fn decode_resume_context(job: &DurableJob) -> Result<Option<ResumeContext>, String> {
    if job.job_type != job_types::RESUME_RUN {
        return Ok(None);
    }
    let raw = job
        .payload
        .get("resume_context")
        .cloned()
        .unwrap_or(Value::Null);
    if raw.is_null() {
        return Err("resume job carries no resume_context".to_string());
    }
    serde_json::from_value(raw)
        .map(Some)
        .map_err(|e| format!("malformed resume_context: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::checkpoint::ResumeMode;
    use serde_json::json;

    #[test]
    fn execute_jobs_have_no_resume_context() {
        let job = DurableJob::new(job_types::EXECUTE_RUN, "t-1", json!({}));
        assert!(decode_resume_context(&job).unwrap().is_none());
    }

    #[test]
    fn resume_jobs_require_a_context() {
        let job = DurableJob::new(job_types::RESUME_RUN, "t-1", json!({}));
        assert!(decode_resume_context(&job).is_err());

        let ctx = ResumeContext {
            mode: ResumeMode::FromCheckpoint,
            resume_step_id: "apply".to_string(),
            skip_step_ids: vec!["analyze".to_string()],
            carry_forward_state: None,
        };
        let job = DurableJob::new(
            job_types::RESUME_RUN,
            "t-1",
            json!({"resume_context": serde_json::to_value(&ctx).unwrap()}),
        );
        let decoded = decode_resume_context(&job).unwrap().unwrap();
        assert_eq!(decoded.resume_step_id, "apply");
    }
}
