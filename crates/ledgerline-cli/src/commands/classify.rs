//! Batch classification and review queue commands

use std::path::Path;

use anyhow::{Context, Result};
use ledgerline_core::input::read_transactions;
use ledgerline_core::{BatchOptions, CancellationToken, Engine};
use tracing::warn;

use super::{category_label, percent, truncate};

pub async fn cmd_classify(engine: &Engine, file: &Path, use_cache: bool, json: bool) -> Result<()> {
    let records = read_transactions(file)
        .with_context(|| format!("Failed to read transactions from {}", file.display()))?;

    if !json {
        println!("📊 Classifying {} transactions from {}...", records.len(), file.display());
    }

    // Ctrl-C stops the batch at the next chunk boundary
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling batch");
                cancel.cancel();
            }
        })
    };

    let report = engine
        .classify_batch(records, BatchOptions { use_cache, cancel })
        .await;
    watcher.abort();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let taxonomy = engine.db().load_taxonomy()?;

    println!();
    println!(
        "   {:<18} {:<18} {:>6}  {:<6} Category",
        "Transaction", "Outcome", "Conf", "Source"
    );
    println!("   ─────────────────────────────────────────────────────────────────────");
    for result in &report.results {
        println!(
            "   {:<18} {:<18} {:>6.2}  {:<6} {}",
            truncate(&result.transaction_id, 18),
            result.outcome.to_string(),
            result.confidence,
            result.source.map(|s| s.as_str()).unwrap_or("-"),
            category_label(&taxonomy, result.category_id)
        );
    }

    let summary = &report.summary;
    println!();
    println!("✅ Classified {} transactions in {} ms", summary.total, summary.duration_ms);
    println!("   Auto-applied:      {}", summary.auto_applied);
    println!("   Queued for review: {}", summary.queued_for_review);
    println!("   Unresolved:        {}", summary.unresolved);
    if summary.errors > 0 {
        println!("   Errors:            {}", summary.errors);
    }
    println!("   Avg confidence:    {:.3}", summary.avg_confidence);
    if summary.cache_lookups > 0 {
        println!("   Cache hit rate:    {}", percent(summary.cache_hit_rate));
    }
    if summary.cancelled {
        println!("⚠️  Batch was cancelled; remaining transactions are unresolved");
    }

    Ok(())
}

pub fn cmd_review(engine: &Engine, limit: i64) -> Result<()> {
    let queue = engine.review_queue(limit)?;

    if queue.is_empty() {
        println!("Nothing waiting for review.");
        return Ok(());
    }

    let taxonomy = engine.db().load_taxonomy()?;

    println!();
    println!("📝 Review queue ({} shown)", queue.len());
    println!("   ─────────────────────────────────────────────────────────────────────");
    for prediction in &queue {
        println!(
            "   {:<18} {:.2}  {}",
            truncate(&prediction.transaction_id, 18),
            prediction.confidence,
            category_label(&taxonomy, prediction.category_id)
        );
        for alt in &prediction.alternatives {
            println!(
                "   {:<18} {:.2}  {}",
                "",
                alt.score,
                category_label(&taxonomy, Some(alt.category_id))
            );
        }
    }
    println!();
    println!("Accept with: ledgerline feedback add <transaction> --accept");

    Ok(())
}
