//! Feedback command implementations

use anyhow::{bail, Result};
use ledgerline_core::{Engine, FeedbackEvent};

use super::{category_label, truncate};

pub fn cmd_feedback_add(
    engine: &Engine,
    transaction_id: &str,
    category: Option<i64>,
    accept: bool,
) -> Result<()> {
    if accept && category.is_some() {
        bail!("Use either --accept or --category, not both");
    }

    let feedback = engine.record_feedback(&FeedbackEvent {
        transaction_id: transaction_id.to_string(),
        chosen_category_id: category,
        accepted_suggestion: accept,
    })?;

    let taxonomy = engine.db().load_taxonomy()?;
    match (feedback.accepted, feedback.label()) {
        (true, label) => println!(
            "✅ Accepted {} for {}",
            category_label(&taxonomy, label),
            transaction_id
        ),
        (false, Some(label)) => println!(
            "✏️  Corrected {} → {}",
            transaction_id,
            category_label(&taxonomy, Some(label))
        ),
        (false, None) => println!("🚫 Rejected suggestion for {}", transaction_id),
    }
    Ok(())
}

pub fn cmd_feedback_list(engine: &Engine, limit: i64) -> Result<()> {
    let entries = engine.list_feedback(limit, 0)?;

    if entries.is_empty() {
        println!("No feedback recorded yet.");
        return Ok(());
    }

    let taxonomy = engine.db().load_taxonomy()?;

    println!();
    println!(
        "   {:>5}  {:<18} {:<24} {:<24} When",
        "ID", "Transaction", "Predicted", "Label"
    );
    println!("   ─────────────────────────────────────────────────────────────────────────────");
    for entry in &entries {
        println!(
            "   {:>5}  {:<18} {:<24} {:<24} {}",
            entry.id,
            truncate(&entry.transaction_id, 18),
            truncate(&category_label(&taxonomy, entry.predicted_category_id), 24),
            truncate(&category_label(&taxonomy, entry.label()), 24),
            entry.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn cmd_feedback_stats(engine: &Engine) -> Result<()> {
    let stats = engine.feedback_stats()?;
    let retrain_after = engine.config().training.retrain_after_feedback;

    println!();
    println!("💬 Feedback");
    println!("   Total:              {}", stats.total);
    println!("   Accepted:           {}", stats.accepted);
    println!("   Corrected:          {}", stats.corrected);
    println!(
        "   Since latest model: {} (retrain at {})",
        stats.since_latest_model, retrain_after
    );
    Ok(())
}
