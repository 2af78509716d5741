//! Loan offer route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn offer_routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests/:id/offers", post(submit_offer))
        .route(
            "/api/requests/:id/offers/:offer_id/accept",
            post(accept_offer),
        )
        .route("/api/offers/:id", get(get_offer))
        .route("/api/offers/:id/decline", post(decline_offer))
        .route("/api/lenders/me/offers", get(list_my_offers))
}
