//! Loan request API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::funding::{FundingEngine, RequestWithOffers};
use crate::middleware::ActingUser;
use crate::models::{ApiResponse, PaginatedResponse};
use crate::request::{CreateLoanRequest, LoanRequest, RequestFilter, RequestStatus};

/// Query for a borrower's own requests
#[derive(Debug, Default, Deserialize)]
pub struct BorrowerRequestsQuery {
    pub status: Option<RequestStatus>,
}

/// Post a new loan request as the acting user
pub async fn submit_request(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
    Json(payload): Json<CreateLoanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LoanRequest>>), ApiError> {
    let request = engine.submit_request(user.user_id, payload).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(request))))
}

/// Marketplace listing
pub async fn list_requests(
    State(engine): State<Arc<FundingEngine>>,
    Query(filter): Query<RequestFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<LoanRequest>>>, ApiError> {
    let page = engine.list_marketplace(&filter).await?;

    Ok(Json(ApiResponse::ok(page)))
}

pub async fn get_request(
    State(engine): State<Arc<FundingEngine>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RequestWithOffers>>, ApiError> {
    let detail = engine.get_request_with_offers(id).await?;

    Ok(Json(ApiResponse::ok(detail)))
}

pub async fn list_my_requests(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
    Query(query): Query<BorrowerRequestsQuery>,
) -> Result<Json<ApiResponse<Vec<LoanRequest>>>, ApiError> {
    let requests = engine
        .list_borrower_requests(user.user_id, query.status)
        .await?;

    Ok(Json(ApiResponse::ok(requests)))
}
