//! `gwi idempotency` handlers.

use crate::cli::context::AppContext;
use crate::cli::output;

use super::CliError;

pub async fn handle_status(ctx: &AppContext, key: &str, json: bool) -> Result<(), CliError> {
    let record = ctx
        .idempotency
        .get_status(&ctx.config.worker.tenant_id, key)
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    match record {
        None => {
            if json {
                println!("null");
            } else {
                println!("no record for key {key}");
            }
        }
        Some(record) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record)
                        .map_err(|e| CliError::Store(e.to_string()))?
                );
            } else {
                println!(
                    "{}  {}  attempts={}  run={}  expires={}",
                    record.key,
                    record.status,
                    record.attempts,
                    record
                        .run_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record
                        .expires_at
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
                if let Some(error) = &record.error {
                    output::failure(error);
                }
            }
        }
    }
    Ok(())
}

pub async fn handle_cleanup(ctx: &AppContext, json: bool) -> Result<(), CliError> {
    let removed = ctx
        .idempotency
        .cleanup_expired()
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    if json {
        println!("{}", serde_json::json!({"removed": removed}));
    } else {
        output::success(&format!("removed {removed} expired records"));
    }
    Ok(())
}

pub async fn handle_metrics(ctx: &AppContext) -> Result<(), CliError> {
    let text = ctx
        .idempotency
        .metrics()
        .export()
        .map_err(|e| CliError::Store(e.to_string()))?;
    print!("{text}");
    Ok(())
}
