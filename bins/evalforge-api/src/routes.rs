// Route definitions for the EvalForge API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evaluations", post(handlers::enqueue_evaluation))
        .route("/evaluations/:id/status", get(handlers::evaluation_status))
        .route("/evaluations/:id/result", get(handlers::evaluation_result))
        .route("/queue/health", get(handlers::queue_health))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/health", get(handlers::health_check))
}
