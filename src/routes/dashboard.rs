//! Dashboard and health route definitions

use axum::{routing::get, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/borrowers/me/dashboard", get(borrower_dashboard))
}
