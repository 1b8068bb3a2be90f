//! Property tests: key codec round-trips and canonicalization laws.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};
use uuid::Uuid;

use gwi::domain::models::event_key::EventKey;
use gwi::infrastructure::crypto::{canonical_json, content_hash};

/// Identifier segments that cannot collide with the `:` delimiter.
fn id_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,24}"
}

proptest! {
    #[test]
    fn api_keys_round_trip(client in id_segment(), request in id_segment()) {
        let key = EventKey::Api {
            client_id: client,
            request_id: request,
        };
        let parsed = EventKey::parse(&key.encode()).unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn slack_keys_round_trip(team in id_segment(), trigger in id_segment()) {
        let key = EventKey::Slack {
            team_id: team,
            trigger_id: trigger,
        };
        let parsed = EventKey::parse(&key.encode()).unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn github_keys_round_trip(bytes in any::<[u8; 16]>()) {
        let key = EventKey::GithubWebhook {
            delivery_id: Uuid::from_bytes(bytes),
        };
        let parsed = EventKey::parse(&key.encode()).unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn scheduler_keys_round_trip(schedule in id_segment(), secs in 0i64..4_000_000_000) {
        let key = EventKey::Scheduler {
            schedule_id: schedule,
            execution_time: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        let parsed = EventKey::parse(&key.encode()).unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn hashing_is_insensitive_to_key_order(
        entries in proptest::collection::vec((id_segment(), 0i64..1000), 1..8)
    ) {
        let forward: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        let reversed: Map<String, Value> = entries
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();

        prop_assert_eq!(
            content_hash(&Value::Object(forward)),
            content_hash(&Value::Object(reversed))
        );
    }

    #[test]
    fn canonical_json_is_idempotent(
        entries in proptest::collection::vec((id_segment(), id_segment()), 0..8)
    ) {
        let map: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let value = Value::Object(map);

        let once = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        prop_assert_eq!(canonical_json(&reparsed), once);
    }
}
