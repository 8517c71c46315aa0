//! Threshold, taxonomy and rule handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use ledgerline_core::{Category, RuleListing, RuleTestResult, Thresholds, TransactionRecord};

use crate::{AppError, AppState};

/// GET /api/config/thresholds
pub async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<Thresholds> {
    Json(state.engine.thresholds())
}

/// PUT /api/config/thresholds - Applies to batches started after the update
pub async fn update_thresholds(
    State(state): State<Arc<AppState>>,
    Json(thresholds): Json<Thresholds>,
) -> Result<Json<Thresholds>, AppError> {
    state.engine.set_thresholds(thresholds)?;
    Ok(Json(state.engine.thresholds()))
}

/// GET /api/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.engine.categories()?))
}

/// GET /api/rules - Compiled rules and the ones disabled at compile time
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Result<Json<RuleListing>, AppError> {
    Ok(Json(state.engine.rules()?))
}

/// POST /api/rules/test - Dry-run a transaction through the rule set
pub async fn test_rules(
    State(state): State<Arc<AppState>>,
    Json(record): Json<TransactionRecord>,
) -> Result<Json<RuleTestResult>, AppError> {
    Ok(Json(state.engine.test_rules(&record)?))
}
