//! Request Repository - persistence and queries for loan requests

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::funding::{FundingError, FundingResult};
use crate::ledger::{LedgerStore, LedgerTransaction};
use crate::models::PaginatedResponse;
use crate::offer::LoanOffer;
use crate::request::{CreateLoanRequest, LoanRequest, RequestFilter, RequestStatus};

/// Owns all loan request persistence
#[derive(Clone)]
pub struct RequestRepository {
    store: Arc<dyn LedgerStore>,
}

impl RequestRepository {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a new request in `seekingFunds` under `id`.
    ///
    /// Creating the same id twice returns the stored request, so a retried
    /// create whose first reply was lost does not duplicate it.
    pub async fn create(
        &self,
        id: Uuid,
        borrower_id: Uuid,
        payload: CreateLoanRequest,
    ) -> FundingResult<LoanRequest> {
        let payload = payload.normalized();
        payload.validate_terms()?;

        let now = Utc::now();
        let request = LoanRequest {
            id,
            borrower_id,
            title: payload.title,
            story: payload.story,
            tags: payload.tags,
            amount: payload.amount,
            max_apr: payload.max_apr,
            term: payload.term,
            status: RequestStatus::SeekingFunds,
            amount_funded: Decimal::ZERO,
            accepted_offer_id: None,
            final_apr: None,
            created_at: now,
            funded_at: None,
            updated_at: now,
        };

        if self.store.insert_request(&request).await? {
            return Ok(request);
        }

        let stored = self.get_by_id(id).await?;
        if stored.borrower_id != borrower_id {
            return Err(FundingError::Conflict(format!(
                "Loan request {} already exists",
                id
            )));
        }
        Ok(stored)
    }

    pub async fn get_by_id(&self, id: Uuid) -> FundingResult<LoanRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan request {} not found", id)))
    }

    pub async fn list_by_borrower(
        &self,
        borrower_id: Uuid,
        status: Option<RequestStatus>,
    ) -> FundingResult<Vec<LoanRequest>> {
        self.find_all(&RequestFilter::for_borrower(borrower_id, status))
            .await
    }

    /// Every request matching the filter, ignoring paging
    pub async fn find_all(&self, filter: &RequestFilter) -> FundingResult<Vec<LoanRequest>> {
        let requests = self.store.query_requests(filter).await?;
        Ok(requests
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    /// Marketplace listing, newest first
    pub async fn list_all(
        &self,
        filter: &RequestFilter,
    ) -> FundingResult<PaginatedResponse<LoanRequest>> {
        let (page, limit) = filter.paging();
        let matching = self.find_all(filter).await?;
        let total = matching.len() as i64;
        let offset = (page as usize - 1).saturating_mul(limit as usize);

        let data = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(PaginatedResponse {
            data,
            total,
            page: page as i32,
            limit: limit as i32,
        })
    }

    /// Move a request to `funded` inside the caller's transaction
    pub async fn mark_funded(
        &self,
        tx: &mut dyn LedgerTransaction,
        id: Uuid,
        offer: &LoanOffer,
        now: DateTime<Utc>,
    ) -> FundingResult<LoanRequest> {
        let mut request = tx
            .get_request(id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan request {} not found", id)))?;

        if request.status != RequestStatus::SeekingFunds {
            return Err(FundingError::Conflict(
                "Loan request has already been funded".to_string(),
            ));
        }
        if offer.amount > request.amount {
            return Err(FundingError::Conflict(
                "Offer amount exceeds the requested amount".to_string(),
            ));
        }

        request.status = RequestStatus::Funded;
        request.amount_funded = offer.amount;
        request.accepted_offer_id = Some(offer.id);
        request.final_apr = Some(offer.apr);
        request.funded_at = Some(now);
        request.updated_at = now;

        tx.put_request(request.clone());
        Ok(request)
    }
}
