//! Terminal output helpers.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::run::{Run, RunStatus};

/// Render runs as a table.
pub fn runs_table(runs: &[Run]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "ID", "TYPE", "STATUS", "STEP", "OWNER", "RESUMES", "CREATED",
    ]);
    for run in runs {
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(run.run_type.as_str()),
            Cell::new(status_styled(run.status)),
            Cell::new(run.current_step.as_deref().unwrap_or("-")),
            Cell::new(run.owner_id.as_deref().unwrap_or("-")),
            Cell::new(run.resume_count),
            Cell::new(run.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

/// Render one run's steps as a table.
pub fn steps_table(run: &Run) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["STEP", "AGENT", "STATUS", "TOKENS", "DURATION", "ERROR"]);
    for step in &run.steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(&step.agent),
            Cell::new(step.status.as_str()),
            Cell::new(step.tokens_used),
            Cell::new(format!("{}ms", step.duration_ms)),
            Cell::new(step.error.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

fn status_styled(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => style(status.as_str()).green().to_string(),
        RunStatus::Failed => style(status.as_str()).red().to_string(),
        RunStatus::Cancelled => style(status.as_str()).yellow().to_string(),
        RunStatus::Running => style(status.as_str()).cyan().to_string(),
        RunStatus::Pending => status.as_str().to_string(),
    }
}

pub fn success(message: &str) {
    println!("{} {message}", style("ok:").green().bold());
}

pub fn failure(message: &str) {
    eprintln!("{} {message}", style("error:").red().bold());
}
