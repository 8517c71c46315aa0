//! Rollout command implementations

use anyhow::Result;
use ledgerline_core::{Engine, ModelVersion, RolloutDecision};

use super::percent;

fn describe(model: Option<&ModelVersion>) -> String {
    match model {
        Some(m) => format!(
            "v{} ({}, {}% traffic, accuracy {})",
            m.id,
            m.status,
            m.rollout_percent,
            percent(m.validation_accuracy)
        ),
        None => "none".to_string(),
    }
}

pub fn cmd_rollout_status(engine: &Engine) -> Result<()> {
    let status = engine.rollout_status()?;

    println!();
    println!("🚦 Rollout");
    println!("   Active:    {}", describe(status.active.as_ref()));
    println!("   Candidate: {}", describe(status.candidate.as_ref()));

    let window = &status.window;
    if window.samples > 0 {
        println!();
        println!("   Window: {} side-by-side samples", window.samples);
        println!("   Disagreement: {}", percent(window.disagreement_rate));
        println!(
            "   p95 latency: active {} µs, candidate {} µs",
            window.active_p95_us, window.candidate_p95_us
        );
    }
    Ok(())
}

pub fn print_decision(decision: &RolloutDecision) {
    match decision {
        RolloutDecision::NoCandidate => println!("No candidate model to evaluate."),
        RolloutDecision::Hold {
            model_version,
            reason,
        } => println!("⏸️  Holding v{}: {}", model_version, reason),
        RolloutDecision::Advanced {
            model_version,
            rollout_percent,
        } => println!(
            "⏩ Advanced v{} to {}% of traffic",
            model_version, rollout_percent
        ),
        RolloutDecision::Promoted {
            model_version,
            previous,
        } => match previous {
            Some(previous) => println!("✅ Promoted v{} (replacing v{})", model_version, previous),
            None => println!("✅ Promoted v{}", model_version),
        },
        RolloutDecision::RolledBack {
            model_version,
            reason,
            detail,
        } => println!("⏪ Rolled back v{} ({}): {}", model_version, reason, detail),
    }
}

pub async fn cmd_rollout_evaluate(engine: &Engine) -> Result<()> {
    let decision = engine.evaluate_rollout().await?;
    print_decision(&decision);
    Ok(())
}

pub async fn cmd_rollout_rollback(engine: &Engine, reason: Option<String>) -> Result<()> {
    let decision = engine.rollback(reason).await?;
    print_decision(&decision);
    Ok(())
}

pub fn cmd_rollout_events(engine: &Engine, limit: i64) -> Result<()> {
    let events = engine.rollout_events(limit)?;

    if events.is_empty() {
        println!("No rollout events yet.");
        return Ok(());
    }

    println!();
    for event in &events {
        let from = event
            .from_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {}  v{:<4} {:<12} {} → {} ({}%){}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.model_version,
            event.kind.as_str(),
            from,
            event.to_status,
            event.rollout_percent,
            event
                .reason
                .as_ref()
                .map(|r| format!(" - {}", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}
