//! Heartbeat and ownership tracking.
//!
//! One cooperative timer per active run stamps `last_heartbeat_at` and
//! `owner_id` on a fixed interval. Timers are plain tokio tasks in a
//! registry; cancellation aborts the task synchronously and shutdown
//! aborts everything and refuses new starts. Orphan detection is a
//! query only; the decision about an orphan belongs to recovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::config::HeartbeatConfig;
use crate::domain::models::run::Run;
use crate::domain::ports::run_repository::RunRepository;

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("Heartbeat service is shut down")]
    ShutDown,
}

pub struct HeartbeatService {
    run_repo: Arc<dyn RunRepository>,
    config: HeartbeatConfig,
    owner_id: String,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl HeartbeatService {
    pub fn new(run_repo: Arc<dyn RunRepository>, config: HeartbeatConfig) -> Self {
        Self {
            run_repo,
            config,
            owner_id: generate_owner_id(),
            timers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Stable identifier of this worker process.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.stale_threshold_ms as i64)
    }

    /// Start the heartbeat timer for a run. Stamps immediately, then on
    /// every interval tick. Replaces any existing timer for the run.
    pub fn start_heartbeat(&self, tenant_id: &str, run_id: Uuid) -> Result<(), HeartbeatError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(HeartbeatError::ShutDown);
        }

        let repo = Arc::clone(&self.run_repo);
        let owner_id = self.owner_id.clone();
        let tenant = tenant_id.to_string();
        let interval = std::time::Duration::from_millis(self.config.interval_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = repo.update_heartbeat(&tenant, run_id, &owner_id).await {
                    warn!(run_id = %run_id, error = %e, "heartbeat stamp failed");
                }
            }
        });

        let mut timers = match self.timers.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = timers.insert(run_id, handle) {
            previous.abort();
        }
        debug!(run_id = %run_id, owner_id = %self.owner_id, "heartbeat started");
        Ok(())
    }

    /// Cancel the timer for a run. Synchronous: no heartbeat side effect
    /// for the run is started after this returns.
    pub fn stop_heartbeat(&self, run_id: Uuid) {
        let mut timers = match self.timers.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = timers.remove(&run_id) {
            handle.abort();
            debug!(run_id = %run_id, "heartbeat stopped");
        }
    }

    /// Number of runs currently under heartbeat.
    pub fn active_count(&self) -> usize {
        match self.timers.lock() {
            Ok(t) => t.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Running runs with a heartbeat older than the stale threshold.
    /// Detection only; failing or resuming orphans is recovery's call.
    pub async fn list_orphaned_runs(
        &self,
        stale_threshold: chrono::Duration,
    ) -> Result<Vec<Run>, StoreError> {
        self.run_repo.list_orphaned(stale_threshold).await
    }

    /// Stop all timers and refuse further starts.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut timers = match self.timers.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for HeartbeatService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `<hostname>-<base36 millis>-<uuid8>`, generated once per process.
fn generate_owner_id() -> String {
    let hostname = gethostname::gethostname();
    let hostname = hostname.to_string_lossy();
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{hostname}-{}-{}", to_base36(millis), &uuid[..8])
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
