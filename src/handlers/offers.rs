//! Loan offer API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::funding::FundingEngine;
use crate::middleware::ActingUser;
use crate::models::ApiResponse;
use crate::offer::{CreateLoanOffer, LoanOffer};
use crate::request::LoanRequest;

/// Make an offer on a request as the acting user
pub async fn submit_offer(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<CreateLoanOffer>,
) -> Result<(StatusCode, Json<ApiResponse<LoanOffer>>), ApiError> {
    let offer = engine
        .submit_offer(request_id, user.user_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(offer))))
}

/// Accept an offer, funding the request
pub async fn accept_offer(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
    Path((request_id, offer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = engine
        .accept_offer(request_id, offer_id, user.user_id)
        .await?;

    Ok(Json(ApiResponse::ok(request)))
}

pub async fn decline_offer(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanOffer>>, ApiError> {
    let offer = engine.decline_offer(offer_id, user.user_id).await?;

    Ok(Json(ApiResponse::ok(offer)))
}

pub async fn get_offer(
    State(engine): State<Arc<FundingEngine>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanOffer>>, ApiError> {
    let offer = engine.get_offer(offer_id).await?;

    Ok(Json(ApiResponse::ok(offer)))
}

/// Offers made by the acting user
pub async fn list_my_offers(
    State(engine): State<Arc<FundingEngine>>,
    user: ActingUser,
) -> Result<Json<ApiResponse<Vec<LoanOffer>>>, ApiError> {
    let offers = engine.list_lender_offers(user.user_id).await?;

    Ok(Json(ApiResponse::ok(offers)))
}
