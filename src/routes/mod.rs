//! Route definitions for the funding API

mod dashboard;
mod offers;
mod requests;

use axum::Router;

use crate::middleware;
use crate::state::AppState;

pub use dashboard::dashboard_routes;
pub use offers::offer_routes;
pub use requests::request_routes;

/// Every route with request tracing applied; CORS is layered on by the binary
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(request_routes())
        .merge(offer_routes())
        .merge(dashboard_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
