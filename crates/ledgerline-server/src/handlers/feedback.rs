//! Reviewer feedback handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use ledgerline_core::{Feedback, FeedbackEvent, FeedbackStats};

use crate::{AppError, AppState, MAX_PAGE_LIMIT};

/// Query parameters for listing feedback
#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    /// Max results (default: 100)
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/feedback - List feedback, newest first
pub async fn list_feedback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedbackQuery>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);
    Ok(Json(state.engine.list_feedback(limit, offset)?))
}

/// POST /api/feedback - Record a reviewer decision
///
/// Rejecting without choosing a category withdraws any earlier label.
pub async fn create_feedback(
    State(state): State<Arc<AppState>>,
    Json(event): Json<FeedbackEvent>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    if event.transaction_id.trim().is_empty() {
        return Err(AppError::bad_request("transaction_id is required"));
    }

    let feedback = state.engine.record_feedback(&event)?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// GET /api/feedback/stats
pub async fn get_feedback_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FeedbackStats>, AppError> {
    Ok(Json(state.engine.feedback_stats()?))
}
