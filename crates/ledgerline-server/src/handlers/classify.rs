//! Classification and review queue handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use ledgerline_core::{BatchOptions, BatchReport, Prediction, PredictionDetail, TransactionRecord};

use crate::{AppError, AppState, MAX_BATCH_SIZE, MAX_PAGE_LIMIT};

/// Request body for batch classification
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    /// Rows are read one by one; a malformed row resolves UNRESOLVED
    #[serde(deserialize_with = "ledgerline_core::deserialize_records")]
    pub transactions: Vec<TransactionRecord>,
    /// Consult the prediction cache (default: true)
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

/// POST /api/classify - Classify a batch of transactions
pub async fn classify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<BatchReport>, AppError> {
    if req.transactions.len() > MAX_BATCH_SIZE {
        return Err(AppError::bad_request(&format!(
            "Batch too large (max {} transactions)",
            MAX_BATCH_SIZE
        )));
    }

    let options = BatchOptions {
        use_cache: req.use_cache,
        ..Default::default()
    };
    let report = state.engine.classify_batch(req.transactions, options).await?;
    info!(
        "Classified {} transactions ({} auto-applied, {} queued)",
        report.summary.total, report.summary.auto_applied, report.summary.queued_for_review
    );
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    #[serde(default = "default_review_limit")]
    pub limit: i64,
}

fn default_review_limit() -> i64 {
    50
}

/// GET /api/review - Predictions waiting on a reviewer
pub async fn review_queue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReviewQuery>,
) -> Result<Json<Vec<Prediction>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.engine.review_queue(limit)?))
}

/// GET /api/predictions/:transaction_id - Current prediction and its history
pub async fn get_prediction(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PredictionDetail>, AppError> {
    Ok(Json(state.engine.prediction(&transaction_id)?))
}
