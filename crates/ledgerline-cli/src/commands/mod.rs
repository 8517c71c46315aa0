//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Database/engine setup and `init`
//! - `taxonomy` - Taxonomy import/list and rule inspection
//! - `classify` - Batch classification and the review queue
//! - `feedback` - Recording and listing reviewer feedback
//! - `training` - Retraining and model versions
//! - `rollout` - Staged rollout status, evaluation and rollback
//! - `serve` - Web server command

pub mod classify;
pub mod core;
pub mod feedback;
pub mod rollout;
pub mod serve;
pub mod taxonomy;
pub mod training;

// Re-export command functions for main.rs
pub use classify::*;
pub use core::*;
pub use feedback::*;
pub use rollout::*;
pub use serve::*;
pub use taxonomy::*;
pub use training::*;

use ledgerline_core::{CategoryId, Taxonomy};

/// Truncate a string to max characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Dotted category path, falling back to the raw id
pub fn category_label(taxonomy: &Taxonomy, category_id: Option<CategoryId>) -> String {
    match category_id {
        Some(id) => taxonomy.path(id).unwrap_or_else(|| format!("#{}", id)),
        None => "-".to_string(),
    }
}

/// Render a 0..1 fraction as a percentage
pub fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
