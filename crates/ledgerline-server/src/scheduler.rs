//! Background scheduler for retraining and rollout evaluation
//!
//! On every tick the scheduler checks the retrain triggers (feedback volume
//! since the last model, elapsed schedule) and then runs one rollout
//! evaluation pass so staged candidates advance, promote or roll back
//! without an operator.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use ledgerline_core::{Engine, RetrainOutcome, RolloutDecision};

/// What one scheduled check did
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledCheck {
    pub retrain: Option<RetrainOutcome>,
    pub rollout: RolloutDecision,
}

/// Start the scheduler as a background task
pub fn start_retrain_scheduler(engine: Arc<Engine>, every: Duration) -> JoinHandle<()> {
    info!(
        "Starting retrain scheduler: checking every {} minutes",
        every.as_secs() / 60
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match run_scheduled_check(&engine).await {
                Ok(check) => {
                    if !matches!(check.rollout, RolloutDecision::NoCandidate) {
                        info!("Scheduled rollout evaluation: {:?}", check.rollout);
                    }
                }
                Err(e) => {
                    error!("Scheduled check failed: {}", e);
                }
            }
        }
    })
}

/// Run a single retrain check followed by a rollout evaluation
pub async fn run_scheduled_check(engine: &Engine) -> ledgerline_core::Result<ScheduledCheck> {
    let retrain = engine.retrain(false).await?;
    if let Some(outcome) = &retrain {
        info!(
            "Scheduled retrain ({:?}) trained on {} samples",
            outcome.trigger, outcome.report.train_samples
        );
    }

    let rollout = engine.evaluate_rollout().await?;
    Ok(ScheduledCheck { retrain, rollout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_core::{Database, EngineConfig};

    #[tokio::test]
    async fn test_check_with_no_feedback_does_nothing() {
        let engine = Engine::new(Database::in_memory().unwrap(), EngineConfig::embedded());

        let check = run_scheduled_check(&engine).await.unwrap();
        assert!(check.retrain.is_none());
        assert_eq!(check.rollout, RolloutDecision::NoCandidate);
    }
}
