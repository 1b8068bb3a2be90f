//! Idempotency service semantics: at-most-once handler invocation,
//! duplicate replay, conflicts, and TTL cleanup.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use gwi::domain::error::IdempotencyError;
use gwi::domain::models::config::IdempotencyConfig;
use gwi::domain::models::event_key::{EventKey, EventSource};
use gwi::domain::models::idempotency::CachedResponse;
use gwi::infrastructure::memory::MemoryIdempotencyStore;
use gwi::services::{IdempotencyMetrics, IdempotencyService};

fn service() -> IdempotencyService {
    service_with(IdempotencyConfig::default())
}

fn service_with(config: IdempotencyConfig) -> IdempotencyService {
    IdempotencyService::new(
        Arc::new(MemoryIdempotencyStore::new()),
        config,
        Arc::new(IdempotencyMetrics::new().expect("metrics")),
    )
}

fn github_key() -> EventKey {
    EventKey::GithubWebhook {
        delivery_id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
    }
}

#[tokio::test]
async fn duplicate_github_webhook_runs_the_handler_once() {
    // S1: one delivery processed, nine replayed.
    let service = Arc::new(service());
    let key = github_key();
    let payload = json!({"action": "opened", "issue": {"number": 42}});
    let run_id = Uuid::new_v4();

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let first = service
        .process(&key, "t-1", &payload, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CachedResponse::RunStarted {
                run_id,
                status_code: Some(202),
                body: Some(json!({"run_id": run_id})),
            })
        })
        .await
        .unwrap();
    assert!(first.processed);
    assert_eq!(first.run_id, Some(run_id));

    let mut replays = Vec::new();
    for _ in 0..9 {
        let service = Arc::clone(&service);
        let key = key.clone();
        let payload = payload.clone();
        let counter = Arc::clone(&invocations);
        replays.push(tokio::spawn(async move {
            service
                .process(&key, "t-1", &payload, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(CachedResponse::Message {
                        text: "should never run".to_string(),
                    })
                })
                .await
                .unwrap()
        }));
    }

    for replay in replays {
        let outcome = replay.await.unwrap();
        assert!(!outcome.processed);
        assert_eq!(outcome.run_id, Some(run_id));
        assert_eq!(outcome.response, first.response);
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        service.metrics().new_requests(EventSource::GithubWebhook),
        1
    );
    assert_eq!(
        service.metrics().duplicates_skipped(EventSource::GithubWebhook),
        9
    );
}

#[tokio::test]
async fn concurrent_burst_invokes_the_handler_at_most_once() {
    let service = Arc::new(service());
    let key = github_key();
    let payload = json!({"n": 1});

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        let key = key.clone();
        let payload = payload.clone();
        let counter = Arc::clone(&invocations);
        tasks.push(tokio::spawn(async move {
            service
                .process(&key, "t-1", &payload, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(CachedResponse::Message {
                        text: "done".to_string(),
                    })
                })
                .await
        }));
    }

    let mut processed = 0;
    let mut replayed = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) if outcome.processed => processed += 1,
            Ok(_) => replayed += 1,
            Err(IdempotencyError::Processing { key, .. }) => {
                assert!(key.starts_with("github:"));
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(processed, 1);
    assert_eq!(processed + replayed + conflicts, 10);
}

#[tokio::test]
async fn scheduler_replay_returns_the_original_result() {
    // S2: three deliveries of the same scheduled execution over time.
    let service = service();
    let key = EventKey::Scheduler {
        schedule_id: "daily-cleanup".to_string(),
        execution_time: Utc.with_ymd_and_hms(2024, 12, 19, 0, 0, 0).unwrap(),
    };
    assert_eq!(key.encode(), "scheduler:daily-cleanup:2024-12-19T00:00:00Z");
    let payload = json!({});

    let first = service
        .process(&key, "t-1", &payload, || async {
            Ok(CachedResponse::Message {
                text: json!({"cleaned": 42}).to_string(),
            })
        })
        .await
        .unwrap();
    assert!(first.processed);

    for _ in 0..2 {
        let outcome = service
            .process(&key, "t-1", &payload, || async {
                Ok(CachedResponse::Message {
                    text: json!({"cleaned": 0}).to_string(),
                })
            })
            .await
            .unwrap();
        assert!(!outcome.processed);
        assert_eq!(outcome.response, first.response);
    }
}

#[tokio::test]
async fn handler_failure_is_cached_and_rethrown() {
    let service = service();
    let key = github_key();
    let payload = json!({});

    let err = service
        .process(&key, "t-1", &payload, || async {
            anyhow::bail!("agent exploded")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, IdempotencyError::HandlerFailed(_)));

    // The failure settled the record; a duplicate replays without
    // invoking its handler.
    let outcome = service
        .process(&key, "t-1", &payload, || async {
            panic!("handler must not run for a settled key")
        })
        .await
        .unwrap();
    assert!(!outcome.processed);

    let record = service
        .get_status("t-1", &key.encode())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.error.as_deref(), Some("agent exploded"));
}

#[tokio::test]
async fn expired_records_are_swept() {
    let mut config = IdempotencyConfig::default();
    config.completed_ttl_ms = 10;
    config.failed_ttl_ms = 10;
    let service = service_with(config);

    for i in 0..3 {
        let key = EventKey::Api {
            client_id: "c".to_string(),
            request_id: format!("r-{i}"),
        };
        service
            .process(&key, "t-1", &json!({}), || async {
                Ok(CachedResponse::Message {
                    text: "ok".to_string(),
                })
            })
            .await
            .unwrap();
    }

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let removed = service.cleanup_expired().await.unwrap();
    assert_eq!(removed, 3);

    for i in 0..3 {
        let record = service
            .get_status("t-1", &format!("api:c:r-{i}"))
            .await
            .unwrap();
        assert!(record.is_none());
    }
}

#[tokio::test]
async fn tenants_are_isolated() {
    let service = service();
    let key = github_key();
    let payload = json!({});

    for tenant in ["t-1", "t-2"] {
        let outcome = service
            .process(&key, tenant, &payload, || async {
                Ok(CachedResponse::Message {
                    text: tenant_marker(tenant),
                })
            })
            .await
            .unwrap();
        assert!(outcome.processed, "tenant {tenant} should process its own key");
    }
}

fn tenant_marker(tenant: &str) -> String {
    format!("processed for {tenant}")
}
