//! CLI entry point.

use clap::Parser;
use gwi::cli::commands::{approval, idempotency, key, run, worker, CliError};
use gwi::cli::context::AppContext;
use gwi::cli::{
    exit_codes, ApprovalCommands, Cli, Commands, IdempotencyCommands, KeyCommands, RunCommands,
};
use gwi::infrastructure::config::ConfigLoader;
use gwi::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_codes::STORE);
        }
    };

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_codes::STORE);
        }
    };

    let ctx = match AppContext::init(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_codes::STORE);
        }
    };

    let result = dispatch(&cli, &ctx).await;
    ctx.close().await;

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(cli: &Cli, ctx: &AppContext) -> Result<(), CliError> {
    match &cli.command {
        Commands::Run(cmd) => match cmd {
            RunCommands::List { status, limit } => {
                run::handle_list(ctx, status.clone(), *limit, cli.json).await
            }
            RunCommands::Show { run_id } => run::handle_show(ctx, run_id, cli.json).await,
            RunCommands::Cancel { run_id } => run::handle_cancel(ctx, run_id, cli.json).await,
        },
        Commands::Approval(cmd) => match cmd {
            ApprovalCommands::Approve {
                run,
                scopes,
                approver,
                role,
                key_id,
                key_file,
            } => {
                approval::handle_approve(
                    ctx, run, scopes, approver, role, key_id, key_file, cli.json,
                )
                .await
            }
            ApprovalCommands::Deny {
                target,
                reason,
                approver,
                role,
                key_id,
                key_file,
            } => {
                approval::handle_deny(
                    ctx, target, reason, approver, role, key_id, key_file, cli.json,
                )
                .await
            }
            ApprovalCommands::Revoke {
                target,
                approver,
                role,
                key_id,
                key_file,
            } => {
                approval::handle_revoke(ctx, target, approver, role, key_id, key_file, cli.json)
                    .await
            }
            ApprovalCommands::Verify { run } => approval::handle_verify(ctx, run, cli.json).await,
        },
        Commands::Key(cmd) => match cmd {
            KeyCommands::Generate { key_id, out } => {
                key::handle_generate(ctx, key_id, out, cli.json).await
            }
            KeyCommands::Revoke { key_id } => key::handle_revoke(ctx, key_id, cli.json).await,
            KeyCommands::List => key::handle_list(ctx, cli.json).await,
        },
        Commands::Idempotency(cmd) => match cmd {
            IdempotencyCommands::Status { key } => {
                idempotency::handle_status(ctx, key, cli.json).await
            }
            IdempotencyCommands::Cleanup => idempotency::handle_cleanup(ctx, cli.json).await,
            IdempotencyCommands::Metrics => idempotency::handle_metrics(ctx).await,
        },
        Commands::Worker { recover_only } => {
            worker::handle_worker(ctx, *recover_only, cli.json).await
        }
        Commands::Serve => worker::handle_serve(ctx).await,
    }
}
