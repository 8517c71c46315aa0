//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `taxonomy` - Categories and categorization rules (imported, read-only to classification)
//! - `predictions` - Prediction history, current predictions, applied categories, model outputs
//! - `feedback` - Append-only feedback log
//! - `model_versions` - Trained classifier versions and their artifacts
//! - `rollout` - Status transitions and the rollout event log

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod feedback;
mod model_versions;
mod predictions;
mod rollout;
mod taxonomy;

pub use predictions::PredictionRecord;
pub use rollout::StatusChange;
pub use taxonomy::ImportSummary;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for the database path
pub const DB_PATH_ENV: &str = "LEDGERLINE_DB";

/// Timestamp format stored in every table (sortable, microsecond precision)
pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite CURRENT_TIMESTAMP format
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) a database and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an isolated throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` so every pooled
    /// connection sees the same data.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "ledgerline_test_{}_{}.db",
            std::process::id(),
            id
        ));

        // Remove any leftover file and its WAL sidecars
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        Self::new(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the per-chunk writers
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Category tree (externally owned, imported)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id INTEGER REFERENCES categories(id),
                is_business INTEGER,                    -- NULL = inherit from parent
                is_system INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);

            -- Categorization rules (externally owned, imported)
            CREATE TABLE IF NOT EXISTS categorization_rules (
                id TEXT PRIMARY KEY,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                field TEXT NOT NULL,                    -- description, merchant, amount
                operator TEXT NOT NULL,                 -- contains, equals, starts_with, ends_with, regex, gt, gte, lt, lte
                value TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 100
            );

            -- Trained classifier versions
            CREATE TABLE IF NOT EXISTS model_versions (
                id INTEGER PRIMARY KEY,
                trained_at TEXT NOT NULL,
                training_sample_count INTEGER NOT NULL,
                validation_accuracy REAL NOT NULL,
                baseline_accuracy REAL,                 -- active version on the same held-out split
                status TEXT NOT NULL,                   -- shadow, partial, active, retired
                rollout_percent INTEGER NOT NULL DEFAULT 0,
                feedback_watermark INTEGER NOT NULL DEFAULT 0,
                retired_reason TEXT,
                retired_at TEXT,
                artifact TEXT NOT NULL                  -- JSON-serialized classifier
            );

            CREATE INDEX IF NOT EXISTS idx_model_versions_status ON model_versions(status);

            -- Prediction history (append-only)
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                category_id INTEGER,
                confidence REAL NOT NULL,
                alternatives TEXT NOT NULL DEFAULT '[]', -- JSON [{category_id, score}]
                model_version INTEGER,
                source TEXT,                             -- rule, model, cache
                outcome TEXT NOT NULL,                   -- AUTO_APPLIED, QUEUED_FOR_REVIEW, UNRESOLVED
                rule_id TEXT,
                text TEXT NOT NULL,                      -- classifier tokens, kept for training
                fingerprint TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_predictions_transaction ON predictions(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_predictions_model ON predictions(model_version);

            -- One current prediction per transaction
            CREATE TABLE IF NOT EXISTS current_predictions (
                transaction_id TEXT PRIMARY KEY,
                prediction_id INTEGER NOT NULL REFERENCES predictions(id)
            );

            -- Categories committed to transactions (auto-applied or confirmed by feedback)
            CREATE TABLE IF NOT EXISTS applied_categories (
                transaction_id TEXT PRIMARY KEY,
                category_id INTEGER NOT NULL,
                source TEXT NOT NULL,                   -- auto, feedback
                applied_at TEXT NOT NULL
            );

            -- Raw per-version model outputs while a candidate is evaluated
            CREATE TABLE IF NOT EXISTS model_outputs (
                id INTEGER PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                model_version INTEGER NOT NULL REFERENCES model_versions(id),
                category_id INTEGER NOT NULL,
                confidence REAL NOT NULL,
                latency_us INTEGER NOT NULL,
                served INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_model_outputs_version ON model_outputs(model_version, transaction_id);

            -- Feedback log (append-only, sole training input)
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                predicted_category_id INTEGER,
                corrected_category_id INTEGER,
                accepted INTEGER NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_transaction ON feedback(transaction_id);

            -- Rollout transitions
            CREATE TABLE IF NOT EXISTS rollout_events (
                id INTEGER PRIMARY KEY,
                model_version INTEGER NOT NULL REFERENCES model_versions(id),
                kind TEXT NOT NULL,                     -- created, advanced, promoted, rolled_back, load_failed
                from_status TEXT,
                to_status TEXT NOT NULL,
                rollout_percent INTEGER NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rollout_events_model ON rollout_events(model_version);

            -- Bumped by every taxonomy import; compiled rule sets are keyed on it
            CREATE TABLE IF NOT EXISTS taxonomy_revision (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO taxonomy_revision (id, revision) VALUES (1, 0);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
