//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use ledgerline_core::CacheStats;

use crate::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_model_version: Option<i64>,
    pub candidate_model_version: Option<i64>,
    pub candidate_rollout_percent: Option<u8>,
    pub cache: CacheStats,
}

/// GET /api/health - Liveness plus serving model summary
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let status = state.engine.rollout_status()?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_model_version: status.active.as_ref().map(|m| m.id),
        candidate_model_version: status.candidate.as_ref().map(|m| m.id),
        candidate_rollout_percent: status.candidate.as_ref().map(|m| m.rollout_percent),
        cache: state.engine.cache_stats(),
    }))
}
