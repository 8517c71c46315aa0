//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ledgerline - Transaction categorization engine
#[derive(Parser)]
#[command(name = "ledgerline")]
#[command(about = "Rule- and model-based transaction categorization", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path (defaults to the platform data directory)
    #[arg(long, env = "LEDGERLINE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long, env = "LEDGERLINE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Import or list the category taxonomy
    Taxonomy {
        #[command(subcommand)]
        action: TaxonomyAction,
    },

    /// List categorization rules or dry-run a transaction against them
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Classify a batch of transactions from a CSV or JSON file
    Classify {
        /// Transaction file (.csv or .json)
        #[arg(short, long)]
        file: PathBuf,

        /// Bypass the prediction cache
        #[arg(long)]
        no_cache: bool,

        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show predictions waiting for review
    Review {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Record or inspect reviewer feedback
    Feedback {
        #[command(subcommand)]
        action: Option<FeedbackAction>,
    },

    /// Retrain the classifier from feedback
    Train {
        /// Train even if no retraining trigger fired
        #[arg(long)]
        force: bool,
    },

    /// List model versions
    Models,

    /// Inspect and drive the staged model rollout
    Rollout {
        #[command(subcommand)]
        action: Option<RolloutAction>,
    },

    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Minutes between retrain/rollout checks (0 disables)
        #[arg(long, default_value = "15")]
        check_minutes: u64,
    },
}

#[derive(Subcommand)]
pub enum TaxonomyAction {
    /// Import categories and rules from a TOML or JSON file
    Import {
        /// Taxonomy file
        file: PathBuf,
    },
    /// List categories as a tree
    List,
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules in evaluation order
    List,
    /// Show which rules match a sample transaction
    Test {
        /// Transaction description
        description: String,

        /// Merchant name
        #[arg(short, long)]
        merchant: Option<String>,

        /// Amount (negative for debits)
        #[arg(short, long, default_value = "-1.0", allow_hyphen_values = true)]
        amount: f64,
    },
}

#[derive(Subcommand)]
pub enum FeedbackAction {
    /// Record a decision on a transaction's current prediction
    Add {
        /// Transaction id
        transaction_id: String,

        /// Category chosen by the reviewer
        #[arg(short, long)]
        category: Option<i64>,

        /// Accept the suggested category
        #[arg(long)]
        accept: bool,
    },
    /// List recent feedback
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
    /// Show feedback counts
    Stats,
}

#[derive(Subcommand)]
pub enum RolloutAction {
    /// Show the active and candidate models
    Status,
    /// Run one rollout evaluation pass
    Evaluate,
    /// Retire the active model and restore its predecessor
    Rollback {
        /// Reason recorded with the rollback
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Show rollout history
    Events {
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
}
