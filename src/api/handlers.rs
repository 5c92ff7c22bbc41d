use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::service::{ServiceError, VisitorService};

pub struct AppState {
    pub service: Arc<VisitorService>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Deserialize)]
pub struct VisitQuery {
    pub ip: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: ServiceError, action: &str) -> ApiError {
    match e {
        ServiceError::MissingAddress => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Missing 'ip' query parameter".to_string(),
            }),
        ),
        ServiceError::Ledger(e) => {
            tracing::error!("Failed to {}: {}", action, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to {}", action),
                }),
            )
        }
    }
}

/// Record a visit from the `ip` query parameter
pub async fn add_visit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VisitQuery>,
) -> Result<StatusCode, ApiError> {
    let ip = query.ip.unwrap_or_default();

    state
        .service
        .record_visit(&ip)
        .await
        .map_err(|e| error_response(e, "record visit"))?;

    Ok(StatusCode::OK)
}

/// Number of active visitors, as plain text
pub async fn count_active(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    let count = state
        .service
        .count_active()
        .await
        .map_err(|e| error_response(e, "count visitors"))?;

    Ok(count.to_string())
}

/// Active visitors per country, as tab-indented JSON
pub async fn count_by_country(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let histogram = state
        .service
        .count_by_country()
        .await
        .map_err(|e| error_response(e, "count visitors by country"))?;

    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    histogram.serialize(&mut serializer).map_err(|e| {
        tracing::error!("Failed to serialize country counts: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to serialize country counts".to_string(),
            }),
        )
    })?;
    body.push(b'\n');

    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
