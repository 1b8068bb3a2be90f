//! `gwi run` handlers.

use crate::cli::context::AppContext;
use crate::cli::output;
use crate::domain::models::run::RunStatus;
use crate::domain::ports::run_repository::RunFilters;

use super::{parse_run_id, CliError};

pub async fn handle_list(
    ctx: &AppContext,
    status: Option<String>,
    limit: u32,
    json: bool,
) -> Result<(), CliError> {
    let status = match status.as_deref() {
        Some(raw) => Some(
            RunStatus::from_str(raw)
                .ok_or_else(|| CliError::Validation(format!("invalid status: {raw}")))?,
        ),
        None => None,
    };

    let filters = RunFilters {
        tenant_id: None,
        status,
        run_type: None,
        limit: Some(limit),
    };
    let runs = ctx.run_repo.list(&filters).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&runs)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        println!("{}", output::runs_table(&runs));
    }
    Ok(())
}

pub async fn handle_show(ctx: &AppContext, run_id: &str, json: bool) -> Result<(), CliError> {
    let run_id = parse_run_id(run_id)?;
    let run = ctx
        .run_repo
        .get(run_id)
        .await?
        .ok_or_else(|| CliError::Validation(format!("run not found: {run_id}")))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        println!("{}", output::runs_table(std::slice::from_ref(&run)));
        if let Some(error) = &run.error {
            output::failure(error);
        }
        if !run.steps.is_empty() {
            println!("{}", output::steps_table(&run));
        }
    }
    Ok(())
}

pub async fn handle_cancel(ctx: &AppContext, run_id: &str, json: bool) -> Result<(), CliError> {
    let run_id = parse_run_id(run_id)?;
    let run = ctx
        .orchestrator
        .cancel_run(run_id)
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        output::success(&format!("run {} is {}", run.id, run.status));
    }
    Ok(())
}
