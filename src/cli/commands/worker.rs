//! `gwi worker` and `gwi serve` handlers.

use std::sync::Arc;

use tracing::info;

use crate::cli::context::AppContext;
use crate::cli::output;
use crate::infrastructure::http::{router, serve, AppState, IdempotencyLayerState};

use super::CliError;

/// Startup recovery, then the claim loop until Ctrl-C.
pub async fn handle_worker(ctx: &AppContext, recover_only: bool, json: bool) -> Result<(), CliError> {
    let worker = Arc::new(ctx.worker());
    info!(owner_id = %worker.owner_id(), "worker starting");

    let summary = worker
        .recover()
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        output::success(&format!(
            "recovery: {} orphaned, {} resumed, {} failed, {} skipped, {} errors ({}ms)",
            summary.orphaned_count,
            summary.resumed_count,
            summary.failed_count,
            summary.skipped_count,
            summary.error_count,
            summary.duration_ms,
        ));
    }

    if recover_only {
        return Ok(());
    }

    let looper = Arc::clone(&worker);
    let loop_handle = tokio::spawn(async move { looper.run_loop().await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;
    info!("shutdown requested");
    worker.stop();

    match loop_handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CliError::Store(e.to_string())),
        Err(e) => Err(CliError::Store(format!("worker task panicked: {e}"))),
    }
}

/// HTTP intake server with the idempotency middleware in front.
pub async fn handle_serve(ctx: &AppContext) -> Result<(), CliError> {
    let state = AppState {
        idempotency: Arc::clone(&ctx.idempotency),
        run_repo: Arc::clone(&ctx.run_repo),
        queue: Arc::clone(&ctx.queue),
        tenant_id: ctx.config.worker.tenant_id.clone(),
    };
    let layer_state = IdempotencyLayerState {
        service: Arc::clone(&ctx.idempotency),
        tenant_id: ctx.config.worker.tenant_id.clone(),
        config: ctx.config.http.clone(),
    };

    let app = router(state, layer_state);
    serve(&ctx.config.http.bind, app)
        .await
        .map_err(|e| CliError::Store(e.to_string()))
}
