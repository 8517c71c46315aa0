//! Training and model version commands

use anyhow::Result;
use ledgerline_core::{Engine, RetrainTrigger};

use super::percent;

pub async fn cmd_train(engine: &Engine, force: bool) -> Result<()> {
    println!("🧠 Checking retraining triggers...");

    let Some(outcome) = engine.retrain(force).await? else {
        println!("   No retraining due (use --force to train anyway)");
        return Ok(());
    };

    let trigger = match outcome.trigger {
        RetrainTrigger::FeedbackThreshold { since } => {
            format!("{} feedback entries since last model", since)
        }
        RetrainTrigger::Schedule => "schedule elapsed".to_string(),
        RetrainTrigger::Forced => "forced".to_string(),
    };
    println!("   Trigger: {}", trigger);

    let report = &outcome.report;
    println!(
        "   Samples: {} ({} train, {} held out)",
        report.total_samples, report.train_samples, report.holdout_samples
    );
    for excluded in &report.excluded {
        println!(
            "   ⚠️  Category #{} excluded ({} samples)",
            excluded.category_id, excluded.samples
        );
    }
    if !report.carried.is_empty() {
        println!("   Kept from active model: {:?}", report.carried);
    }

    match &report.model {
        Some(model) => {
            println!("✅ Trained model v{} (shadow)", model.id);
            println!(
                "   Validation accuracy: {}",
                percent(model.validation_accuracy)
            );
            if let Some(baseline) = report.baseline_accuracy {
                println!("   Active model on same split: {}", percent(baseline));
            }
            println!("   Run 'ledgerline rollout evaluate' to start the rollout");
        }
        None => {
            println!(
                "⚠️  Training skipped: {}",
                report.skipped.as_deref().unwrap_or("no model produced")
            );
        }
    }
    Ok(())
}

pub fn cmd_models(engine: &Engine) -> Result<()> {
    let models = engine.models()?;

    if models.is_empty() {
        println!("No models trained yet. Record feedback and run 'ledgerline train'.");
        return Ok(());
    }

    println!();
    println!(
        "   {:>4}  {:<8} {:>7} {:>8} {:>9}  {:<16} Retired",
        "Ver", "Status", "Traffic", "Samples", "Accuracy", "Trained"
    );
    println!("   ─────────────────────────────────────────────────────────────────────────");
    for model in &models {
        println!(
            "   {:>4}  {:<8} {:>6}% {:>8} {:>9}  {:<16} {}",
            model.id,
            model.status.to_string(),
            model.rollout_percent,
            model.training_sample_count,
            percent(model.validation_accuracy),
            model.trained_at.format("%Y-%m-%d %H:%M"),
            model
                .retired_reason
                .map(|r| r.to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}
