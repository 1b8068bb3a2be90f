//! HTTP idempotency middleware.
//!
//! Requests on configured methods carrying an idempotency header are
//! checked against the store before they reach the handler. Duplicates
//! replay the original status and body with `X-Idempotency-Replayed:
//! true`; concurrent duplicates are shed with 409 and `Retry-After`.
//! The handler's response is captured outside the check-and-set and
//! settles the record afterwards.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::error::IdempotencyError;
use crate::domain::models::config::HttpConfig;
use crate::domain::models::event_key::EventKey;
use crate::domain::models::idempotency::{CachedResponse, CheckOutcome};
use crate::services::idempotency::IdempotencyService;

/// Headers recognized as the request's idempotency key, in priority
/// order.
const KEY_HEADERS: [&str; 3] = ["X-Idempotency-Key", "Idempotency-Key", "X-Request-ID"];

const CLIENT_ID_HEADER: &str = "X-Client-ID";

/// Largest request/response body the middleware will buffer.
const MAX_BUFFERED_BODY: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct IdempotencyLayerState {
    pub service: Arc<IdempotencyService>,
    pub tenant_id: String,
    pub config: HttpConfig,
}

pub async fn idempotency_middleware(
    State(state): State<IdempotencyLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    if !state
        .config
        .idempotent_methods
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&method))
        || state.config.skip_paths.iter().any(|p| p == &path)
    {
        return next.run(request).await;
    }

    let Some(request_id) = extract_key_header(request.headers()) else {
        return next.run(request).await;
    };
    let client_id = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();

    let key = EventKey::Api {
        client_id,
        request_id,
    };
    let encoded = key.encode();

    // Buffer the request body so the payload hash covers what the
    // handler will actually see.
    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &encoded,
                &format!("request body too large: {e}"),
            );
        }
    };
    let payload: Value = serde_json::from_slice(&body_bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()));

    let outcome = state.service.check(&key, &state.tenant_id, &payload).await;

    match outcome {
        Ok(CheckOutcome::New { .. }) => {
            let request = Request::from_parts(parts, Body::from(body_bytes));
            let response = next.run(request).await;
            settle_from_response(&state, &key, response, &encoded).await
        }
        Ok(CheckOutcome::Duplicate(record)) => replay_response(&record, &encoded),
        Ok(CheckOutcome::Processing(_)) => {
            conflict_response(&encoded, state.service.conflict_retry_after_secs())
        }
        Err(IdempotencyError::Validation(e)) => {
            error_response(StatusCode::BAD_REQUEST, &encoded, &e.to_string())
        }
        Err(e) => {
            error!(key = %encoded, error = %e, "idempotency check failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &encoded, &e.to_string())
        }
    }
}

fn extract_key_header(headers: &HeaderMap) -> Option<String> {
    KEY_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Capture the handler's response and settle the record.
async fn settle_from_response(
    state: &IdempotencyLayerState,
    key: &EventKey,
    response: Response,
    encoded: &str,
) -> Response {
    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %encoded, error = %e, "could not buffer response for caching");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                encoded,
                "response capture failed",
            );
        }
    };

    if status.is_success() {
        let cached = cacheable_from_body(status, &body_bytes);
        if let Err(e) = state.service.complete(key, &state.tenant_id, &cached).await {
            warn!(key = %encoded, error = %e, "could not settle idempotency record");
        }
    } else {
        let message = String::from_utf8_lossy(&body_bytes).into_owned();
        if let Err(e) = state.service.fail(key, &state.tenant_id, &message).await {
            warn!(key = %encoded, error = %e, "could not settle idempotency record");
        }
    }

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    set_key_header(response.headers_mut(), encoded);
    response
}

fn cacheable_from_body(status: StatusCode, body: &[u8]) -> CachedResponse {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        if let Some(run_id) = json
            .get("run_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            return CachedResponse::RunStarted {
                run_id,
                status_code: Some(status.as_u16()),
                body: Some(json),
            };
        }
    }
    CachedResponse::Message {
        text: String::from_utf8_lossy(body).into_owned(),
    }
}

/// Reconstitute the original response for a duplicate delivery.
fn replay_response(record: &crate::domain::models::idempotency::IdempotencyRecord, encoded: &str) -> Response {
    let (status, body) = match (&record.response, &record.error) {
        (
            Some(CachedResponse::RunStarted {
                status_code, body, ..
            }),
            _,
        ) => (
            status_code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::OK),
            body.as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "{}".to_string()),
        ),
        (Some(CachedResponse::Message { text }), _) => (StatusCode::OK, text.clone()),
        (Some(CachedResponse::Error { message }), _) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": message}).to_string(),
        ),
        // The first delivery failed; duplicates replay the same error.
        (None, Some(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": error}).to_string(),
        ),
        (None, None) => (StatusCode::OK, "{}".to_string()),
    };

    let mut response = (status, body).into_response();
    set_key_header(response.headers_mut(), encoded);
    response.headers_mut().insert(
        "X-Idempotency-Replayed",
        HeaderValue::from_static("true"),
    );
    response
}

fn conflict_response(encoded: &str, retry_after_secs: u32) -> Response {
    let body = json!({
        "error": "conflict",
        "message": "request is already being processed",
        "key": encoded,
    });
    let mut response = (StatusCode::CONFLICT, body.to_string()).into_response();
    set_key_header(response.headers_mut(), encoded);
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}

fn error_response(status: StatusCode, encoded: &str, message: &str) -> Response {
    let body = json!({"error": status.as_str(), "message": message, "key": encoded});
    let mut response = (status, body.to_string()).into_response();
    set_key_header(response.headers_mut(), encoded);
    response
}

fn set_key_header(headers: &mut HeaderMap, encoded: &str) {
    if let Ok(value) = HeaderValue::from_str(encoded) {
        headers.insert("X-Idempotency-Key", value);
    }
}
