//! Error types for Ledgerline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed transaction; the transaction resolves UNRESOLVED
    #[error("Invalid transaction: {0}")]
    Input(String),

    /// Bad rule pattern or field/operator pair; only that rule is disabled
    #[error("Rule {rule_id} failed to compile: {reason}")]
    RuleCompilation { rule_id: String, reason: String },

    /// Invalid category tree (cycle, dangling parent)
    #[error("Invalid taxonomy: {0}")]
    Taxonomy(String),

    /// Classifier unavailable; classification falls back to rules only
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Not enough labelled feedback to train
    #[error("Insufficient training data: {0}")]
    TrainingDataInsufficient(String),

    /// A candidate model failed its promotion criteria or regressed live
    #[error("Rollout regression for model {version}: {reason}")]
    RolloutRegression { version: i64, reason: String },

    /// A status change found the version in a different state than expected
    #[error("Model {version} is {actual}, expected {expected}")]
    TransitionConflict {
        version: i64,
        expected: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
