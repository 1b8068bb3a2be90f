//! Idempotency key domain model.
//!
//! Every inbound event (webhook, API call, chat command, scheduler tick)
//! is reduced to a deterministic, printable, `:`-delimited key. Keys are
//! parseable back to their structured form so stored records can be
//! attributed to their source.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::ValidationError;

/// Where an inbound event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    GithubWebhook,
    Api,
    Slack,
    Scheduler,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GithubWebhook => "github_webhook",
            Self::Api => "api",
            Self::Slack => "slack",
            Self::Scheduler => "scheduler",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "github_webhook" => Some(Self::GithubWebhook),
            "api" => Some(Self::Api),
            "slack" => Some(Self::Slack),
            "scheduler" => Some(Self::Scheduler),
            _ => None,
        }
    }

    /// The leading tag used in the wire form of keys from this source.
    pub fn key_tag(&self) -> &'static str {
        match self {
            Self::GithubWebhook => "github",
            Self::Api => "api",
            Self::Slack => "slack",
            Self::Scheduler => "scheduler",
        }
    }

    fn from_key_tag(tag: &str) -> Option<Self> {
        match tag {
            "github" => Some(Self::GithubWebhook),
            "api" => Some(Self::Api),
            "slack" => Some(Self::Slack),
            "scheduler" => Some(Self::Scheduler),
            _ => None,
        }
    }

    pub const ALL: [EventSource; 4] = [
        Self::GithubWebhook,
        Self::Api,
        Self::Slack,
        Self::Scheduler,
    ];
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured form of an idempotency key.
///
/// Wire forms:
/// - `github:<deliveryId>` (delivery id is a UUID)
/// - `api:<clientId>:<requestId>`
/// - `slack:<teamId>:<triggerId>`
/// - `scheduler:<scheduleId>:<executionTime ISO-8601 UTC>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventKey {
    GithubWebhook {
        delivery_id: Uuid,
    },
    Api {
        client_id: String,
        request_id: String,
    },
    Slack {
        team_id: String,
        trigger_id: String,
    },
    Scheduler {
        schedule_id: String,
        execution_time: DateTime<Utc>,
    },
}

impl EventKey {
    pub fn source(&self) -> EventSource {
        match self {
            Self::GithubWebhook { .. } => EventSource::GithubWebhook,
            Self::Api { .. } => EventSource::Api,
            Self::Slack { .. } => EventSource::Slack,
            Self::Scheduler { .. } => EventSource::Scheduler,
        }
    }

    /// Canonical wire form, `<tag>:<fields joined by ':'>`.
    pub fn encode(&self) -> String {
        let codec = codec_for(self.source());
        (codec.encode)(self)
    }

    /// Parse a wire-form key back into its structured form.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let tag = raw
            .split(':')
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let source = EventSource::from_key_tag(tag)
            .ok_or_else(|| ValidationError::UnknownKeySource(tag.to_string()))?;
        let codec = codec_for(source);
        let key = (codec.parse)(raw)?;
        (codec.validate)(&key)?;
        Ok(key)
    }

    /// Validate source-specific field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        (codec_for(self.source()).validate)(self)
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encoder/parser/validator triple for one event source.
///
/// Keeps per-source key handling in one table instead of match arms
/// scattered across the intake path.
struct KeyCodec {
    encode: fn(&EventKey) -> String,
    parse: fn(&str) -> Result<EventKey, ValidationError>,
    validate: fn(&EventKey) -> Result<(), ValidationError>,
}

fn codec_for(source: EventSource) -> &'static KeyCodec {
    match source {
        EventSource::GithubWebhook => &GITHUB_CODEC,
        EventSource::Api => &API_CODEC,
        EventSource::Slack => &SLACK_CODEC,
        EventSource::Scheduler => &SCHEDULER_CODEC,
    }
}

static GITHUB_CODEC: KeyCodec = KeyCodec {
    encode: |key| match key {
        EventKey::GithubWebhook { delivery_id } => format!("github:{delivery_id}"),
        _ => unreachable!("codec dispatched on source"),
    },
    parse: |raw| {
        let rest = raw
            .strip_prefix("github:")
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let delivery_id = Uuid::parse_str(rest)
            .map_err(|_| ValidationError::InvalidKeyField {
                event_source: EventSource::GithubWebhook,
                field: "delivery_id",
                value: rest.to_string(),
            })?;
        Ok(EventKey::GithubWebhook { delivery_id })
    },
    validate: |_| Ok(()),
};

static API_CODEC: KeyCodec = KeyCodec {
    encode: |key| match key {
        EventKey::Api {
            client_id,
            request_id,
        } => format!("api:{client_id}:{request_id}"),
        _ => unreachable!("codec dispatched on source"),
    },
    parse: |raw| {
        let rest = raw
            .strip_prefix("api:")
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let (client_id, request_id) = rest
            .split_once(':')
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        Ok(EventKey::Api {
            client_id: client_id.to_string(),
            request_id: request_id.to_string(),
        })
    },
    validate: |key| match key {
        EventKey::Api {
            client_id,
            request_id,
        } if client_id.is_empty() || request_id.is_empty() => {
            Err(ValidationError::InvalidKeyField {
                event_source: EventSource::Api,
                field: "client_id/request_id",
                value: String::new(),
            })
        }
        _ => Ok(()),
    },
};

static SLACK_CODEC: KeyCodec = KeyCodec {
    encode: |key| match key {
        EventKey::Slack {
            team_id,
            trigger_id,
        } => format!("slack:{team_id}:{trigger_id}"),
        _ => unreachable!("codec dispatched on source"),
    },
    parse: |raw| {
        let rest = raw
            .strip_prefix("slack:")
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let (team_id, trigger_id) = rest
            .split_once(':')
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        Ok(EventKey::Slack {
            team_id: team_id.to_string(),
            trigger_id: trigger_id.to_string(),
        })
    },
    validate: |key| match key {
        EventKey::Slack {
            team_id,
            trigger_id,
        } if team_id.is_empty() || trigger_id.is_empty() => {
            Err(ValidationError::InvalidKeyField {
                event_source: EventSource::Slack,
                field: "team_id/trigger_id",
                value: String::new(),
            })
        }
        _ => Ok(()),
    },
};

static SCHEDULER_CODEC: KeyCodec = KeyCodec {
    encode: |key| match key {
        EventKey::Scheduler {
            schedule_id,
            execution_time,
        } => format!(
            "scheduler:{schedule_id}:{}",
            execution_time.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        _ => unreachable!("codec dispatched on source"),
    },
    parse: |raw| {
        let rest = raw
            .strip_prefix("scheduler:")
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let (schedule_id, time_str) = rest
            .split_once(':')
            .ok_or_else(|| ValidationError::MalformedKey(raw.to_string()))?;
        let execution_time = DateTime::parse_from_rfc3339(time_str)
            .map_err(|_| ValidationError::InvalidKeyField {
                event_source: EventSource::Scheduler,
                field: "execution_time",
                value: time_str.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(EventKey::Scheduler {
            schedule_id: schedule_id.to_string(),
            execution_time,
        })
    },
    validate: |key| match key {
        EventKey::Scheduler { schedule_id, .. } if schedule_id.is_empty() => {
            Err(ValidationError::InvalidKeyField {
                event_source: EventSource::Scheduler,
                field: "schedule_id",
                value: String::new(),
            })
        }
        _ => Ok(()),
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn github_key_round_trips() {
        let delivery_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = EventKey::GithubWebhook { delivery_id };
        let encoded = key.encode();
        assert_eq!(encoded, "github:550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(EventKey::parse(&encoded).unwrap(), key);
    }

    #[test]
    fn github_key_rejects_non_uuid() {
        let err = EventKey::parse("github:not-a-uuid").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidKeyField { .. }));
    }

    #[test]
    fn scheduler_key_uses_utc_z_suffix() {
        let key = EventKey::Scheduler {
            schedule_id: "daily-cleanup".to_string(),
            execution_time: Utc.with_ymd_and_hms(2024, 12, 19, 0, 0, 0).unwrap(),
        };
        assert_eq!(key.encode(), "scheduler:daily-cleanup:2024-12-19T00:00:00Z");
        assert_eq!(EventKey::parse(&key.encode()).unwrap(), key);
    }

    #[test]
    fn api_and_slack_keys_round_trip() {
        let api = EventKey::Api {
            client_id: "client-1".to_string(),
            request_id: "req-42".to_string(),
        };
        assert_eq!(api.encode(), "api:client-1:req-42");
        assert_eq!(EventKey::parse("api:client-1:req-42").unwrap(), api);

        let slack = EventKey::Slack {
            team_id: "T01".to_string(),
            trigger_id: "trig.123".to_string(),
        };
        assert_eq!(EventKey::parse(&slack.encode()).unwrap(), slack);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = EventKey::parse("teams:abc:def").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownKeySource(_)));
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert!(EventKey::parse("api::req").is_err());
        assert!(EventKey::parse("scheduler::2024-12-19T00:00:00Z").is_err());
    }
}
