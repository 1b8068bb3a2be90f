//! SQLite check-and-set semantics: lock lifecycle, attempt caps, expiry
//! handling, and winner uniqueness under contention.

mod helpers;

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use gwi::domain::models::event_key::EventSource;
use gwi::domain::models::idempotency::{CachedResponse, CheckOutcome, IdempotencyStatus};
use gwi::domain::ports::idempotency_store::{CheckAndSetParams, IdempotencyStore};
use gwi::infrastructure::database::SqliteIdempotencyStore;

use helpers::database::{setup_test_db, teardown_test_db};

fn params(key: &str) -> CheckAndSetParams {
    CheckAndSetParams {
        key: key.to_string(),
        source: EventSource::Api,
        tenant_id: "t-1".to_string(),
        request_hash: "hash".to_string(),
        lock_timeout: Duration::seconds(60),
        max_attempts: 3,
        failed_ttl: Duration::seconds(3600),
    }
}

fn short_lock(key: &str) -> CheckAndSetParams {
    CheckAndSetParams {
        lock_timeout: Duration::milliseconds(20),
        ..params(key)
    }
}

#[tokio::test]
async fn first_caller_wins_second_sees_processing() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());

    let outcome = store.check_and_set(&params("api:c:r1")).await.unwrap();
    assert!(outcome.is_new());

    let outcome = store.check_and_set(&params("api:c:r1")).await.unwrap();
    match outcome {
        CheckOutcome::Processing(record) => {
            assert_eq!(record.status, IdempotencyStatus::Processing);
            assert_eq!(record.attempts, 1);
        }
        other => panic!("expected Processing, got {other:?}"),
    }

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn settled_keys_replay_until_expiry() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());

    assert!(store.check_and_set(&params("api:c:r2")).await.unwrap().is_new());
    store
        .settle_completed(
            "t-1",
            "api:c:r2",
            &CachedResponse::Message {
                text: "done".to_string(),
            },
            Duration::hours(1),
        )
        .await
        .unwrap();

    match store.check_and_set(&params("api:c:r2")).await.unwrap() {
        CheckOutcome::Duplicate(record) => {
            assert_eq!(record.status, IdempotencyStatus::Completed);
            assert!(record.lock_expires_at.is_none());
            assert!(record.expires_at.is_some());
        }
        other => panic!("expected Duplicate, got {other:?}"),
    }

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn expired_settles_are_treated_as_absent() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());

    assert!(store.check_and_set(&params("api:c:r3")).await.unwrap().is_new());
    store
        .settle_completed(
            "t-1",
            "api:c:r3",
            &CachedResponse::Message {
                text: "old".to_string(),
            },
            Duration::milliseconds(10),
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // The record expired, so the key is processable again.
    let outcome = store.check_and_set(&params("api:c:r3")).await.unwrap();
    assert!(outcome.is_new());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn expired_locks_are_recovered_up_to_the_attempt_cap() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());
    let key = "api:c:r4";

    // First holder acquires and "crashes": the lock just expires.
    assert!(store.check_and_set(&short_lock(key)).await.unwrap().is_new());
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    // Attempt 2: lock recovery.
    match store.check_and_set(&short_lock(key)).await.unwrap() {
        CheckOutcome::New { lock_recovered } => assert!(lock_recovered),
        other => panic!("expected lock recovery, got {other:?}"),
    }
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    // Attempt 3: last allowed recovery.
    assert!(store.check_and_set(&short_lock(key)).await.unwrap().is_new());
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    // Attempt cap reached: the key settles as failed.
    match store.check_and_set(&short_lock(key)).await.unwrap() {
        CheckOutcome::Duplicate(record) => {
            assert_eq!(record.status, IdempotencyStatus::Failed);
            assert_eq!(
                record.error.as_deref(),
                Some("Max processing attempts exceeded")
            );
            assert!(record.lock_expires_at.is_none());
        }
        other => panic!("expected failed Duplicate, got {other:?}"),
    }

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn exactly_one_winner_under_contention() {
    let pool = setup_test_db().await;
    let store = Arc::new(SqliteIdempotencyStore::new(pool.clone()));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.check_and_set(&params("api:c:contended")).await.unwrap()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap().is_new() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn cleanup_removes_exactly_the_expired() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());

    for (key, ttl_ms) in [("api:c:dead1", 5), ("api:c:dead2", 5), ("api:c:alive", 60_000)] {
        assert!(store.check_and_set(&params(key)).await.unwrap().is_new());
        store
            .settle_completed(
                "t-1",
                key,
                &CachedResponse::Message {
                    text: json!({"key": key}).to_string(),
                },
                Duration::milliseconds(ttl_ms),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let removed = store.cleanup_expired().await.unwrap();
    assert_eq!(removed, 2);

    assert!(store.get("t-1", "api:c:dead1").await.unwrap().is_none());
    assert!(store.get("t-1", "api:c:alive").await.unwrap().is_some());

    teardown_test_db(pool).await;
}

#[tokio::test]
async fn get_round_trips_the_full_record() {
    let pool = setup_test_db().await;
    let store = SqliteIdempotencyStore::new(pool.clone());

    assert!(store.check_and_set(&params("api:c:r5")).await.unwrap().is_new());
    let run_id = uuid::Uuid::new_v4();
    store
        .settle_completed(
            "t-1",
            "api:c:r5",
            &CachedResponse::RunStarted {
                run_id,
                status_code: Some(202),
                body: Some(json!({"run_id": run_id})),
            },
            Duration::hours(1),
        )
        .await
        .unwrap();

    let record = store.get("t-1", "api:c:r5").await.unwrap().unwrap();
    assert_eq!(record.source, EventSource::Api);
    assert_eq!(record.request_hash, "hash");
    assert_eq!(record.run_id, Some(run_id));
    match record.response.unwrap() {
        CachedResponse::RunStarted { run_id: cached, .. } => assert_eq!(cached, run_id),
        other => panic!("expected RunStarted, got {other:?}"),
    }

    teardown_test_db(pool).await;
}
