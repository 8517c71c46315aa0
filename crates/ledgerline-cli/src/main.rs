//! Ledgerline CLI - Transaction categorization engine
//!
//! Usage:
//!   ledgerline init                       Initialize database
//!   ledgerline taxonomy import FILE       Load categories and rules
//!   ledgerline classify --file CSV        Classify a batch of transactions
//!   ledgerline feedback add TX --accept   Confirm a suggestion
//!   ledgerline train                      Retrain from feedback
//!   ledgerline rollout evaluate           Advance, promote or roll back a candidate
//!   ledgerline serve --port 3000          Start the REST API

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use ledgerline_core::config::default_db_path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let config_path = cli.config.as_deref();

    if let Commands::Init = cli.command {
        return commands::cmd_init(&db_path, config_path);
    }

    let engine = commands::open_engine(&db_path, config_path)?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Taxonomy { action } => match action {
            TaxonomyAction::Import { file } => commands::cmd_taxonomy_import(&engine, &file),
            TaxonomyAction::List => commands::cmd_taxonomy_list(&engine),
        },
        Commands::Rules { action } => match action {
            None | Some(RulesAction::List) => commands::cmd_rules_list(&engine),
            Some(RulesAction::Test {
                description,
                merchant,
                amount,
            }) => commands::cmd_rules_test(&engine, &description, merchant.as_deref(), amount),
        },
        Commands::Classify {
            file,
            no_cache,
            json,
        } => commands::cmd_classify(&engine, &file, !no_cache, json).await,
        Commands::Review { limit } => commands::cmd_review(&engine, limit),
        Commands::Feedback { action } => match action {
            Some(FeedbackAction::Add {
                transaction_id,
                category,
                accept,
            }) => commands::cmd_feedback_add(&engine, &transaction_id, category, accept),
            None => commands::cmd_feedback_list(&engine, 20),
            Some(FeedbackAction::List { limit }) => commands::cmd_feedback_list(&engine, limit),
            Some(FeedbackAction::Stats) => commands::cmd_feedback_stats(&engine),
        },
        Commands::Train { force } => commands::cmd_train(&engine, force).await,
        Commands::Models => commands::cmd_models(&engine),
        Commands::Rollout { action } => match action {
            None | Some(RolloutAction::Status) => commands::cmd_rollout_status(&engine),
            Some(RolloutAction::Evaluate) => commands::cmd_rollout_evaluate(&engine).await,
            Some(RolloutAction::Rollback { reason }) => {
                commands::cmd_rollout_rollback(&engine, reason).await
            }
            Some(RolloutAction::Events { limit }) => commands::cmd_rollout_events(&engine, limit),
        },
        Commands::Serve {
            port,
            host,
            check_minutes,
        } => commands::cmd_serve(engine, &db_path, &host, port, check_minutes).await,
    }
}
