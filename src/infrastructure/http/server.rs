//! HTTP surface: event intake behind the idempotency middleware, plus
//! health and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::domain::error::StoreError;
use crate::domain::models::event_key::EventKey;
use crate::domain::models::job::{job_types, DurableJob};
use crate::domain::models::run::{Run, RunTrigger, RunType};
use crate::domain::ports::job_queue::JobQueue;
use crate::domain::ports::run_repository::RunRepository;
use crate::services::idempotency::IdempotencyService;

use super::middleware::{idempotency_middleware, IdempotencyLayerState};

#[derive(Clone)]
pub struct AppState {
    pub idempotency: Arc<IdempotencyService>,
    pub run_repo: Arc<dyn RunRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub tenant_id: String,
}

/// Build the router with the idempotency middleware applied to the
/// intake routes.
pub fn router(state: AppState, layer_state: IdempotencyLayerState) -> Router {
    Router::new()
        .route("/v1/events", post(accept_event))
        .layer(middleware::from_fn_with_state(
            layer_state,
            idempotency_middleware,
        ))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(bind: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind = %bind, "http server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.idempotency.metrics().export() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "metrics export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AcceptEventRequest {
    #[serde(default = "default_run_type")]
    run_type: RunType,
    actor_id: String,
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    repository: Option<String>,
}

fn default_run_type() -> RunType {
    RunType::Autopilot
}

/// Accept an inbound event: materialize the run and enqueue its job.
///
/// The idempotency middleware in front guarantees this handler runs at
/// most once per key; duplicates replay the response produced here.
async fn accept_event(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<AcceptEventRequest>,
) -> Response {
    let request_id = headers
        .get("X-Idempotency-Key")
        .or_else(|| headers.get("Idempotency-Key"))
        .or_else(|| headers.get("X-Request-ID"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let client_id = headers
        .get("X-Client-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();

    let trigger = RunTrigger {
        event_key: EventKey::Api {
            client_id,
            request_id,
        },
        actor_id: body.actor_id,
        issue: body.issue,
        repository: body.repository,
    };

    match start_run(&state, body.run_type, trigger).await {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(json!({"run_id": run.id, "status": run.status})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to accept event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn start_run(
    state: &AppState,
    run_type: RunType,
    trigger: RunTrigger,
) -> Result<Run, StoreError> {
    let run = Run::new(state.tenant_id.clone(), run_type, trigger);
    state.run_repo.insert(&run).await?;

    let job = DurableJob::new(job_types::EXECUTE_RUN, state.tenant_id.clone(), json!({}))
        .for_run(run.id);
    state.queue.enqueue(&job).await?;

    info!(run_id = %run.id, run_type = %run_type, "run accepted and enqueued");
    Ok(run)
}
