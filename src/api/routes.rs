use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::VisitorService;

use super::handlers::{add_visit, count_active, count_by_country, health_check, AppState};

pub fn create_api_router(service: Arc<VisitorService>) -> Router {
    let state = Arc::new(AppState { service });

    // Counters are read by browser widgets on other origins.
    Router::new()
        .route("/add", get(add_visit).post(add_visit))
        .route("/count", get(count_active))
        .route("/countries", get(count_by_country))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
