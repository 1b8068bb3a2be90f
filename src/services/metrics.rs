//! Idempotency counters.
//!
//! Counters only; aggregation across workers is an external concern.
//! Exported in Prometheus text format via the HTTP `/metrics` endpoint
//! or `gwi idempotency metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::domain::models::event_key::EventSource;

pub struct IdempotencyMetrics {
    registry: Registry,
    checks_total: IntCounterVec,
    new_requests: IntCounterVec,
    duplicates_skipped: IntCounterVec,
    processing_conflicts: IntCounterVec,
    lock_recoveries: IntCounterVec,
    completed_total: IntCounterVec,
    failed_total: IntCounterVec,
    ttl_cleanups: IntCounter,
}

impl IdempotencyMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter_vec = |name: &str, help: &str| -> Result<IntCounterVec, prometheus::Error> {
            let vec = IntCounterVec::new(Opts::new(name, help), &["source"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let checks_total = counter_vec("gwi_idempotency_checks_total", "Check-and-set calls")?;
        let new_requests = counter_vec("gwi_idempotency_new_requests_total", "Keys seen first")?;
        let duplicates_skipped = counter_vec(
            "gwi_idempotency_duplicates_skipped_total",
            "Duplicate deliveries replayed from cache",
        )?;
        let processing_conflicts = counter_vec(
            "gwi_idempotency_processing_conflicts_total",
            "Duplicates rejected while the first delivery was in flight",
        )?;
        let lock_recoveries = counter_vec(
            "gwi_idempotency_lock_recoveries_total",
            "Expired processing locks taken over",
        )?;
        let completed_total = counter_vec(
            "gwi_idempotency_completed_total",
            "Records settled as completed",
        )?;
        let failed_total =
            counter_vec("gwi_idempotency_failed_total", "Records settled as failed")?;

        let ttl_cleanups = IntCounter::new(
            "gwi_idempotency_ttl_cleanups_total",
            "Expired records removed by cleanup sweeps",
        )?;
        registry.register(Box::new(ttl_cleanups.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            new_requests,
            duplicates_skipped,
            processing_conflicts,
            lock_recoveries,
            completed_total,
            failed_total,
            ttl_cleanups,
        })
    }

    pub fn inc_checks(&self, source: EventSource) {
        self.checks_total.with_label_values(&[source.as_str()]).inc();
    }

    pub fn inc_new(&self, source: EventSource) {
        self.new_requests.with_label_values(&[source.as_str()]).inc();
    }

    pub fn inc_duplicate(&self, source: EventSource) {
        self.duplicates_skipped
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn inc_conflict(&self, source: EventSource) {
        self.processing_conflicts
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn inc_lock_recovery(&self, source: EventSource) {
        self.lock_recoveries
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn inc_completed(&self, source: EventSource) {
        self.completed_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn inc_failed(&self, source: EventSource) {
        self.failed_total.with_label_values(&[source.as_str()]).inc();
    }

    pub fn add_ttl_cleanups(&self, count: u64) {
        self.ttl_cleanups.inc_by(count);
    }

    /// Per-source counter value, for tests and status displays.
    pub fn duplicates_skipped(&self, source: EventSource) -> u64 {
        self.duplicates_skipped
            .with_label_values(&[source.as_str()])
            .get()
    }

    pub fn new_requests(&self, source: EventSource) -> u64 {
        self.new_requests.with_label_values(&[source.as_str()]).get()
    }

    pub fn processing_conflicts(&self, source: EventSource) -> u64 {
        self.processing_conflicts
            .with_label_values(&[source.as_str()])
            .get()
    }

    /// Prometheus text exposition of every counter.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("non-utf8 metrics output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_source() {
        let metrics = IdempotencyMetrics::new().unwrap();
        metrics.inc_new(EventSource::GithubWebhook);
        metrics.inc_duplicate(EventSource::GithubWebhook);
        metrics.inc_duplicate(EventSource::GithubWebhook);
        metrics.inc_duplicate(EventSource::Scheduler);

        assert_eq!(metrics.new_requests(EventSource::GithubWebhook), 1);
        assert_eq!(metrics.duplicates_skipped(EventSource::GithubWebhook), 2);
        assert_eq!(metrics.duplicates_skipped(EventSource::Scheduler), 1);
        assert_eq!(metrics.duplicates_skipped(EventSource::Api), 0);
    }

    #[test]
    fn export_is_prometheus_text() {
        let metrics = IdempotencyMetrics::new().unwrap();
        metrics.inc_checks(EventSource::Api);
        metrics.add_ttl_cleanups(3);

        let text = metrics.export().unwrap();
        assert!(text.contains("gwi_idempotency_checks_total{source=\"api\"} 1"));
        assert!(text.contains("gwi_idempotency_ttl_cleanups_total 3"));
    }
}
