//! Logger initialization using tracing.
//!
//! Stdout format follows config (`json` or `pretty`); when a log
//! directory is configured, a daily-rolling JSON file layer is added.
//! The returned guard must be held for the process lifetime or buffered
//! file output is lost.

use std::io;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Initialize the global subscriber. Returns a guard that must outlive
/// the process's logging.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if let Some(log_dir) = &config.log_dir {
        let file_appender = rolling::daily(log_dir, "gwi.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // File output is always JSON for structured ingestion.
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        let stdout_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        if config.format == "json" {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(stdout_filter);
            tracing_subscriber::registry()
                .with(file_layer)
                .with(stdout_layer)
                .init();
        } else {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(stdout_filter);
            tracing_subscriber::registry()
                .with(file_layer)
                .with(stdout_layer)
                .init();
        }

        Ok(Some(guard))
    } else {
        if config.format == "json" {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(stdout_layer).init();
        } else {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(stdout_layer).init();
        }
        Ok(None)
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("invalid log level: {other}")),
    }
}
