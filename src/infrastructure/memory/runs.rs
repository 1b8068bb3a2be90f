//! In-memory run repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::run::{Run, RunStatus};
use crate::domain::ports::run_repository::{RunFilters, RunRepository};

#[derive(Default)]
pub struct MemoryRunRepository {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::ConstraintViolation(format!(
                "run {} already exists",
                run.id
            )));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.lock().await.get(&id).cloned())
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        let existing = runs
            .get(&run.id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run.id)))?;

        if existing.status.is_terminal() && existing.status != run.status {
            return Err(StoreError::ConstraintViolation(format!(
                "run {} is terminal ({}) and cannot move to {}",
                run.id, existing.status, run.status
            )));
        }

        let mut updated = run.clone();
        updated.updated_at = Utc::now();
        runs.insert(run.id, updated);
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        owner_id: &str,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.get_mut(&run_id) {
            if run.tenant_id == tenant_id && run.status.is_in_flight() {
                let now = Utc::now();
                run.last_heartbeat_at = Some(now);
                run.owner_id = Some(owner_id.to_string());
                run.updated_at = now;
            }
        }
        Ok(())
    }

    async fn list(&self, filters: &RunFilters) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.lock().await;
        let mut matched: Vec<Run> = runs
            .values()
            .filter(|r| {
                filters
                    .tenant_id
                    .as_ref()
                    .is_none_or(|t| &r.tenant_id == t)
                    && filters.status.is_none_or(|s| r.status == s)
                    && filters.run_type.is_none_or(|t| r.run_type == t)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filters.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn list_orphaned(&self, stale_threshold: Duration) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.lock().await;
        let now = Utc::now();
        // Pending runs are excluded: no worker ever owned them, so they
        // are queued work, not orphans.
        let mut orphans: Vec<Run> = runs
            .values()
            .filter(|r| {
                r.status == RunStatus::Running && r.heartbeat_is_stale(now, stale_threshold)
            })
            .cloned()
            .collect();
        orphans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orphans)
    }
}
