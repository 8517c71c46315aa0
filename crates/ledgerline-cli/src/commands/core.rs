//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_engine` - Open the database and load engine configuration
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use ledgerline_core::{Database, Engine, EngineConfig};

pub fn open_db(db_path: &Path) -> Result<Database> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    Database::new(path_str).context("Failed to open database")
}

pub fn load_config(config_path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::load(config_path).context("Failed to load engine configuration")
}

pub fn open_engine(db_path: &Path, config_path: Option<&Path>) -> Result<Engine> {
    let db = open_db(db_path)?;
    let config = load_config(config_path)?;
    Ok(Engine::new(db, config))
}

pub fn cmd_init(db_path: &Path, config_path: Option<&Path>) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let config = load_config(config_path)?;
    open_db(db_path)?;

    println!(
        "   Thresholds: auto-apply ≥ {:.2}, review ≥ {:.2}",
        config.thresholds.auto_apply_threshold, config.thresholds.review_threshold
    );
    println!(
        "   Retraining: every {} new feedback entries or {} hours",
        config.training.retrain_after_feedback, config.training.schedule_hours
    );
    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Load categories and rules: ledgerline taxonomy import taxonomy.toml");
    println!("  2. Classify transactions: ledgerline classify --file transactions.csv");
    println!("  3. Start the API: ledgerline serve");

    Ok(())
}
