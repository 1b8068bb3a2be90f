use chrono::{DateTime, Utc};

use crate::domain::error::StoreError;

/// Parse an RFC3339 timestamp from a TEXT column.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("invalid timestamp {s:?}: {e}")))
}

/// Parse an optional RFC3339 TEXT column.
pub fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(parse_datetime).transpose()
}

/// Serialize a value to a JSON TEXT column.
pub fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Deserialize a JSON TEXT column.
pub fn from_json_text<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}
