//! Offer Repository - persistence and queries for loan offers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::funding::{FundingError, FundingResult};
use crate::ledger::{LedgerStore, LedgerTransaction, OfferStatusUpdate};
use crate::offer::{CreateLoanOffer, LoanOffer, OfferFilter, OfferStatus};
use crate::request::RequestStatus;

/// Owns all loan offer persistence
#[derive(Clone)]
pub struct OfferRepository {
    store: Arc<dyn LedgerStore>,
}

impl OfferRepository {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a `pending` offer under `id` against a request
    /// still seeking funds. Creating the same id twice returns the stored offer.
    pub async fn create(
        &self,
        id: Uuid,
        loan_request_id: Uuid,
        lender_id: Uuid,
        payload: CreateLoanOffer,
    ) -> FundingResult<LoanOffer> {
        payload.validate_terms()?;

        let request = self.store.get_request(loan_request_id).await?.ok_or_else(|| {
            FundingError::NotFound(format!("Loan request {} not found", loan_request_id))
        })?;

        if request.status != RequestStatus::SeekingFunds {
            return Err(FundingError::Conflict(
                "Loan request is no longer accepting offers".to_string(),
            ));
        }
        if payload.amount > request.amount {
            return Err(FundingError::Validation(format!(
                "Offer amount {} exceeds the requested amount {}",
                payload.amount, request.amount
            )));
        }

        let now = Utc::now();
        let offer = LoanOffer {
            id,
            loan_request_id,
            lender_id,
            amount: payload.amount,
            apr: payload.apr,
            message: payload.normalized_message(),
            status: OfferStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        if self.store.insert_offer(&offer).await? {
            return Ok(offer);
        }

        let stored = self.get_by_id(id).await?;
        if stored.lender_id != lender_id || stored.loan_request_id != loan_request_id {
            return Err(FundingError::Conflict(format!(
                "Loan offer {} already exists",
                id
            )));
        }
        Ok(stored)
    }

    pub async fn get_by_id(&self, id: Uuid) -> FundingResult<LoanOffer> {
        self.store
            .get_offer(id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan offer {} not found", id)))
    }

    pub async fn list_by_request(&self, loan_request_id: Uuid) -> FundingResult<Vec<LoanOffer>> {
        Ok(self
            .store
            .query_offers(&OfferFilter::for_request(loan_request_id))
            .await?)
    }

    pub async fn list_pending_by_request(
        &self,
        loan_request_id: Uuid,
    ) -> FundingResult<Vec<LoanOffer>> {
        Ok(self
            .store
            .query_offers(&OfferFilter::pending_for_request(loan_request_id))
            .await?)
    }

    pub async fn list_by_lender(&self, lender_id: Uuid) -> FundingResult<Vec<LoanOffer>> {
        Ok(self
            .store
            .query_offers(&OfferFilter::for_lender(lender_id))
            .await?)
    }

    /// Conditional status update in its own transaction
    pub async fn set_status(
        &self,
        id: Uuid,
        status: OfferStatus,
        expected: OfferStatus,
    ) -> FundingResult<LoanOffer> {
        let mut tx = self.store.begin().await?;
        let offer = self
            .transition(tx.as_mut(), id, status, expected, Utc::now())
            .await?;
        tx.commit().await?;
        Ok(offer)
    }

    /// Conditional status update inside the caller's transaction.
    ///
    /// Fails with `Conflict` when the offer is not in `expected` or the move
    /// would leave a terminal state.
    pub async fn transition(
        &self,
        tx: &mut dyn LedgerTransaction,
        id: Uuid,
        status: OfferStatus,
        expected: OfferStatus,
        now: DateTime<Utc>,
    ) -> FundingResult<LoanOffer> {
        let mut offer = tx
            .get_offer(id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan offer {} not found", id)))?;

        if offer.status != expected {
            return Err(FundingError::Conflict(format!(
                "Offer is {} but {} was expected",
                offer.status, expected
            )));
        }
        if !offer.status.can_transition_to(status) {
            return Err(FundingError::Conflict(format!(
                "Offer cannot move from {} to {}",
                offer.status, status
            )));
        }

        offer.status = status;
        offer.updated_at = now;
        tx.put_offer(offer.clone());
        Ok(offer)
    }

    /// Batch every still-pending offer on a request to `auto-declined`,
    /// sparing `keep`. Returns how many offers changed.
    pub async fn auto_decline_pending(
        &self,
        loan_request_id: Uuid,
        keep: Option<Uuid>,
    ) -> FundingResult<u64> {
        let pending = self.list_pending_by_request(loan_request_id).await?;
        let now = Utc::now();

        let updates: Vec<OfferStatusUpdate> = pending
            .into_iter()
            .filter(|offer| Some(offer.id) != keep)
            .map(|offer| OfferStatusUpdate {
                offer_id: offer.id,
                expected: OfferStatus::Pending,
                status: OfferStatus::AutoDeclined,
                updated_at: now,
            })
            .collect();

        if updates.is_empty() {
            return Ok(0);
        }

        Ok(self.store.apply_offer_batch(updates).await?)
    }
}
