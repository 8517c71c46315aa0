//! Model version, training and rollout handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use ledgerline_core::{ModelVersion, RetrainOutcome, RolloutDecision, RolloutEvent, RolloutStatus};

use crate::{AppError, AppState, MAX_PAGE_LIMIT};

/// GET /api/models - All model versions, newest first
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelVersion>>, AppError> {
    Ok(Json(state.engine.models()?))
}

#[derive(Debug, Default, Deserialize)]
pub struct TrainingRunRequest {
    /// Train even if no trigger fired
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TrainingRunResponse {
    pub ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RetrainOutcome>,
}

/// POST /api/training/run - Retrain if due (or when forced)
pub async fn run_training(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TrainingRunRequest>>,
) -> Result<Json<TrainingRunResponse>, AppError> {
    let Json(req) = body.unwrap_or_default();
    let outcome = state.engine.retrain(req.force).await?;

    if let Some(outcome) = &outcome {
        match &outcome.report.model {
            Some(model) => info!("Training produced candidate model {}", model.id),
            None => info!(
                "Training skipped: {}",
                outcome.report.skipped.as_deref().unwrap_or("no model produced")
            ),
        }
    }

    Ok(Json(TrainingRunResponse {
        ran: outcome.is_some(),
        outcome,
    }))
}

/// GET /api/rollout - Active and candidate versions plus the observation window
pub async fn get_rollout_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RolloutStatus>, AppError> {
    Ok(Json(state.engine.rollout_status()?))
}

/// POST /api/rollout/evaluate - Run one rollout evaluation pass
pub async fn evaluate_rollout(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RolloutDecision>, AppError> {
    Ok(Json(state.engine.evaluate_rollout().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    pub reason: Option<String>,
}

/// POST /api/rollout/rollback - Retire the active model and restore its predecessor
pub async fn rollback_model(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RollbackRequest>>,
) -> Result<Json<RolloutDecision>, AppError> {
    let Json(req) = body.unwrap_or_default();
    Ok(Json(state.engine.rollback(req.reason).await?))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: i64,
}

fn default_events_limit() -> i64 {
    50
}

/// GET /api/rollout/events - Rollout history, newest first
pub async fn list_rollout_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<RolloutEvent>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.engine.rollout_events(limit)?))
}
