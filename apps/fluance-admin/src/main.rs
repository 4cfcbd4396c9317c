use std::process::ExitCode;

use clap::Parser;
use fluance_ledger::{ErrorKind, LedgerError};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod context;

use cli::{AuditCommand, Cli, Command, ConfigCommand, DiagnoseCommand, TokenCommand};
use commands::*;
use context::Context;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Distinct exit codes per failure class so scripts can branch on them.
fn exit_code(err: &(dyn std::error::Error + 'static)) -> u8 {
    match err.downcast_ref::<LedgerError>().map(LedgerError::kind) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::NotFound) | Some(ErrorKind::ProductNotFound) => 3,
        Some(ErrorKind::AlreadyUsed) | Some(ErrorKind::Expired) => 4,
        Some(ErrorKind::AlreadyExists) => 5,
        Some(ErrorKind::BackingStore) => 6,
        None => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code(e.as_ref()))
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Config { config_cmd } = &cli.command {
        return match config_cmd {
            ConfigCommand::Show => cmd_config_show(cli.config.as_deref(), cli.json),
            ConfigCommand::Init { path, force } => {
                cmd_config_init(path.as_deref(), cli.config.as_deref(), *force)
            }
        };
    }

    let ctx = Context::open(&cli).await?;

    match cli.command {
        Command::Token { token_cmd } => match token_cmd {
            TokenCommand::Issue {
                email,
                products,
                days,
                note,
                supersede,
                plain,
            } => {
                cmd_token_issue(&ctx, &email, products, days, note, supersede, plain).await?;
            }
            TokenCommand::IssueBatch {
                emails,
                file,
                products,
                days,
                note,
            } => {
                cmd_token_issue_batch(&ctx, emails, file.as_deref(), products, days, note).await?;
            }
            TokenCommand::Redeem { token, user_id } => {
                cmd_token_redeem(&ctx, &token, &user_id).await?;
            }
            TokenCommand::Show { token } => {
                cmd_token_show(&ctx, &token).await?;
            }
            TokenCommand::List {
                email,
                used,
                unused,
                since_days,
                limit,
            } => {
                let used = match (used, unused) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                cmd_token_list(&ctx, email.as_deref(), used, since_days, limit).await?;
            }
            TokenCommand::Invalidate { token, reason } => {
                cmd_token_invalidate(&ctx, &token, &reason).await?;
            }
            TokenCommand::MarkUsed { token, note } => {
                cmd_token_mark_used(&ctx, &token, &note).await?;
            }
            TokenCommand::MarkUsedForEmail { email, note } => {
                cmd_token_mark_used_for_email(&ctx, &email, &note).await?;
            }
        },
        Command::Grant { user_id, product } => {
            cmd_grant(&ctx, &user_id, &product).await?;
        }
        Command::Revoke { user_id, product } => {
            cmd_revoke(&ctx, &user_id, &product).await?;
        }
        Command::Entitlements { target } => {
            cmd_entitlements(&ctx, target.user_id.as_deref(), target.email.as_deref()).await?;
        }
        Command::SetStartDate {
            user_id,
            product,
            when,
        } => {
            cmd_set_start_date(&ctx, &user_id, &product, when.date, when.days_back).await?;
        }
        Command::Repair {
            user_id,
            email,
            products,
        } => {
            cmd_repair(&ctx, &user_id, &email, &products).await?;
        }
        Command::Diagnose { diagnose_cmd } => match diagnose_cmd {
            DiagnoseCommand::Orphans => {
                cmd_diagnose_orphans(&ctx).await?;
            }
            DiagnoseCommand::Legacy { user_id } => {
                cmd_diagnose_legacy(&ctx, user_id.as_deref()).await?;
            }
            DiagnoseCommand::Activation { since_days } => {
                cmd_diagnose_activation(&ctx, since_days).await?;
            }
        },
        Command::Audit { audit_cmd } => match audit_cmd {
            AuditCommand::List {
                user_id,
                resource,
                action,
                result,
                since_days,
                limit,
                offset,
            } => {
                cmd_audit_list(
                    &ctx,
                    user_id.as_deref(),
                    resource.as_deref(),
                    action.as_deref(),
                    result.as_deref(),
                    since_days,
                    limit,
                    offset,
                )
                .await?;
            }
            AuditCommand::Get { id } => {
                cmd_audit_get(&ctx, &id).await?;
            }
            AuditCommand::Count {
                user_id,
                action,
                result,
            } => {
                cmd_audit_count(&ctx, user_id.as_deref(), action.as_deref(), result.as_deref())
                    .await?;
            }
        },
        // Handled before the store is opened.
        Command::Config { .. } => {}
    }

    Ok(())
}
