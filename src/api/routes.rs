use crate::api::handlers;
use axum::{routing::get, Router};

/// Build the operator router
pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
