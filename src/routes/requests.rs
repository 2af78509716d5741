//! Loan request route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests", post(submit_request).get(list_requests))
        .route("/api/requests/:id", get(get_request))
        .route("/api/borrowers/me/requests", get(list_my_requests))
}
