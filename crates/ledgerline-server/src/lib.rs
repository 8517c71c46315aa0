//! Ledgerline Web Server
//!
//! Axum-based REST API over the categorization engine:
//! - Batch classification and the review queue
//! - Feedback capture and statistics
//! - Training runs, model versions and staged rollout control
//! - Threshold and rule inspection
//!
//! Errors are sanitized: internal failures return a generic message and the
//! full error is logged server-side.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use ledgerline_core::{Engine, Error as CoreError};

mod handlers;
mod scheduler;

pub use scheduler::{run_scheduled_check, start_retrain_scheduler, ScheduledCheck};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Maximum transactions accepted in one classify request
pub const MAX_BATCH_SIZE: usize = 50_000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Interval for retrain/rollout checks; None disables the scheduler
    pub check_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            check_interval: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Create the application router
pub fn create_router(engine: Arc<Engine>, config: &ServerConfig) -> Router {
    let state = Arc::new(AppState { engine });

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Classification
        .route("/classify", post(handlers::classify))
        .route("/review", get(handlers::review_queue))
        .route("/predictions/:transaction_id", get(handlers::get_prediction))
        // Feedback
        .route(
            "/feedback",
            get(handlers::list_feedback).post(handlers::create_feedback),
        )
        .route("/feedback/stats", get(handlers::get_feedback_stats))
        // Models, training and rollout
        .route("/models", get(handlers::list_models))
        .route("/training/run", post(handlers::run_training))
        .route("/rollout", get(handlers::get_rollout_status))
        .route("/rollout/evaluate", post(handlers::evaluate_rollout))
        .route("/rollout/rollback", post(handlers::rollback_model))
        .route("/rollout/events", get(handlers::list_rollout_events))
        // Configuration, taxonomy and rules
        .route(
            "/config/thresholds",
            get(handlers::get_thresholds).put(handlers::update_thresholds),
        )
        .route("/categories", get(handlers::list_categories))
        .route("/rules", get(handlers::list_rules))
        .route("/rules/test", post(handlers::test_rules));

    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the server
pub async fn serve(
    engine: Engine,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let engine = Arc::new(engine);

    if let Some(interval) = config.check_interval {
        start_retrain_scheduler(engine.clone(), interval);
    } else {
        info!("Retrain scheduler disabled");
    }

    let app = create_router(engine, &config);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Ledgerline API listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        // Caller mistakes keep their message; everything else is sanitized
        if let Some(core) = err.downcast_ref::<CoreError>() {
            match core {
                CoreError::NotFound(_) => return Self::not_found(&core.to_string()),
                CoreError::TransitionConflict { .. } => {
                    return Self::conflict(&core.to_string())
                }
                CoreError::Input(_)
                | CoreError::Taxonomy(_)
                | CoreError::Config(_)
                | CoreError::TrainingDataInsufficient(_) => {
                    return Self::bad_request(&core.to_string())
                }
                _ => {}
            }
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
