use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Conversion and execution
            .route("/generate", post(handlers::api::generate_sql))
            .route("/execute", post(handlers::api::execute_sql))
            .route("/auto-execute", post(handlers::api::auto_execute))
            // Introspection
            .route("/schema", get(handlers::api::get_schema))
            .route("/providers", get(handlers::api::get_providers))
            .route("/examples", get(handlers::api::get_examples))
            // System status
            .route("/health", get(handlers::api::health_check)),
    )
}
