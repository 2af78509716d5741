//! Dashboard and health handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::funding::FundingEngine;
use crate::ledger::LedgerStore;
use crate::middleware::ActingUser;
use crate::models::ApiResponse;
use crate::projections::BorrowerDashboard;

pub async fn borrower_dashboard(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
) -> Result<Json<ApiResponse<BorrowerDashboard>>, ApiError> {
    let dashboard = engine.borrower_dashboard(user.user_id).await?;

    Ok(Json(ApiResponse::ok(dashboard)))
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health_check(
    State(store): State<Arc<dyn LedgerStore>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (code, status, store_status) = match store.health_check().await {
        Ok(()) => (StatusCode::OK, "healthy", "connected".to_string()),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "unhealthy",
            format!("error: {}", e),
        ),
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            store: store_status,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
