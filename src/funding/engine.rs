//! Funding Workflow Engine
//!
//! Owns the cross-entity transitions of the funding workflow. Accepting and
//! declining offers run as serializable store transactions; store-transient
//! failures are retried through [`RetryPolicy`], business conflicts are not.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use super::error::{FundingError, FundingResult};
use super::retry::RetryPolicy;
use crate::ledger::LedgerStore;
use crate::models::PaginatedResponse;
use crate::offer::{CreateLoanOffer, LoanOffer, OfferFilter, OfferRepository, OfferStatus};
use crate::projections::{BorrowerDashboard, FundingProgress};
use crate::request::{
    CreateLoanRequest, LoanRequest, RequestFilter, RequestRepository, RequestStatus,
};

/// Concurrent sweeps run by one reconciliation pass
const RECONCILE_CONCURRENCY: usize = 4;

/// A request together with every offer made against it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWithOffers {
    pub request: LoanRequest,
    pub offers: Vec<LoanOffer>,
    pub progress: FundingProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    pub request_id: Uuid,
    pub auto_declined: u64,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requests_checked: usize,
    pub offers_auto_declined: u64,
    pub failures: usize,
}

pub struct FundingEngine {
    requests: RequestRepository,
    offers: OfferRepository,
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl FundingEngine {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self {
            requests: RequestRepository::new(store.clone()),
            offers: OfferRepository::new(store.clone()),
            store,
            retry,
        }
    }

    pub fn requests(&self) -> &RequestRepository {
        &self.requests
    }

    pub fn offers(&self) -> &OfferRepository {
        &self.offers
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Create a request in `seekingFunds` owned by `borrower_id`
    pub async fn submit_request(
        &self,
        borrower_id: Uuid,
        payload: CreateLoanRequest,
    ) -> FundingResult<LoanRequest> {
        // One id across attempts so a replayed insert is recognised
        let id = Uuid::new_v4();
        let request = self
            .retry
            .run("submit_request", move || {
                self.requests.create(id, borrower_id, payload.clone())
            })
            .await?;

        tracing::info!(
            request_id = %request.id,
            borrower_id = %borrower_id,
            amount = %request.amount,
            "Loan request submitted"
        );
        Ok(request)
    }

    /// Create a `pending` offer from `lender_id` against a request still seeking funds
    pub async fn submit_offer(
        &self,
        request_id: Uuid,
        lender_id: Uuid,
        payload: CreateLoanOffer,
    ) -> FundingResult<LoanOffer> {
        let id = Uuid::new_v4();
        let offer = self
            .retry
            .run("submit_offer", move || {
                self.offers.create(id, request_id, lender_id, payload.clone())
            })
            .await?;

        tracing::info!(
            request_id = %request_id,
            offer_id = %offer.id,
            lender_id = %lender_id,
            amount = %offer.amount,
            apr = %offer.apr,
            "Loan offer submitted"
        );
        Ok(offer)
    }

    /// Fund `request_id` with `offer_id`, then sweep competing offers.
    ///
    /// The acceptance is all-or-nothing. The sweep runs afterwards and its
    /// failure does not fail the acceptance; the reconciler finishes it.
    pub async fn accept_offer(
        &self,
        request_id: Uuid,
        offer_id: Uuid,
        acting_user_id: Uuid,
    ) -> FundingResult<LoanRequest> {
        let funded = self
            .retry
            .run("accept_offer", move || {
                self.try_accept_offer(request_id, offer_id, acting_user_id)
            })
            .await?;

        tracing::info!(
            request_id = %request_id,
            offer_id = %offer_id,
            amount_funded = %funded.amount_funded,
            "Loan request funded"
        );

        if let Err(e) = self.sweep_competing_offers(request_id).await {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "Competing offers left pending; reconciler will retry the sweep"
            );
        }

        Ok(funded)
    }

    async fn try_accept_offer(
        &self,
        request_id: Uuid,
        offer_id: Uuid,
        acting_user_id: Uuid,
    ) -> FundingResult<LoanRequest> {
        let mut tx = self.store.begin().await?;

        let request = tx.get_request(request_id).await?.ok_or_else(|| {
            FundingError::NotFound(format!("Loan request {} not found", request_id))
        })?;
        if request.borrower_id != acting_user_id {
            return Err(FundingError::Authorization(
                "Only the borrower can accept offers on this request".to_string(),
            ));
        }
        if request.status != RequestStatus::SeekingFunds {
            return Err(FundingError::Conflict(
                "Loan request has already been funded".to_string(),
            ));
        }

        let offer = tx
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan offer {} not found", offer_id)))?;
        if offer.loan_request_id != request_id {
            return Err(FundingError::Conflict(format!(
                "Offer {} does not belong to loan request {}",
                offer_id, request_id
            )));
        }

        let now = Utc::now();
        let accepted = self
            .offers
            .transition(
                tx.as_mut(),
                offer_id,
                OfferStatus::Accepted,
                OfferStatus::Pending,
                now,
            )
            .await?;
        let funded = self
            .requests
            .mark_funded(tx.as_mut(), request_id, &accepted, now)
            .await?;

        tx.commit().await?;
        Ok(funded)
    }

    /// Decline a pending offer; only the parent request's borrower may do so
    pub async fn decline_offer(
        &self,
        offer_id: Uuid,
        acting_user_id: Uuid,
    ) -> FundingResult<LoanOffer> {
        let declined = self
            .retry
            .run("decline_offer", move || {
                self.try_decline_offer(offer_id, acting_user_id)
            })
            .await?;

        tracing::info!(
            offer_id = %offer_id,
            request_id = %declined.loan_request_id,
            "Loan offer declined"
        );
        Ok(declined)
    }

    async fn try_decline_offer(
        &self,
        offer_id: Uuid,
        acting_user_id: Uuid,
    ) -> FundingResult<LoanOffer> {
        let mut tx = self.store.begin().await?;

        let offer = tx
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| FundingError::NotFound(format!("Loan offer {} not found", offer_id)))?;
        let request = tx.get_request(offer.loan_request_id).await?.ok_or_else(|| {
            FundingError::NotFound(format!(
                "Loan request {} not found",
                offer.loan_request_id
            ))
        })?;

        if request.borrower_id != acting_user_id {
            return Err(FundingError::Authorization(
                "Only the borrower can decline offers on this request".to_string(),
            ));
        }

        let declined = self
            .offers
            .transition(
                tx.as_mut(),
                offer_id,
                OfferStatus::Declined,
                OfferStatus::Pending,
                Utc::now(),
            )
            .await?;

        tx.commit().await?;
        Ok(declined)
    }

    pub async fn get_request_with_offers(
        &self,
        request_id: Uuid,
    ) -> FundingResult<RequestWithOffers> {
        let request = self.requests.get_by_id(request_id).await?;
        let offers = self.offers.list_by_request(request_id).await?;
        let progress = FundingProgress::for_request(&request);

        Ok(RequestWithOffers {
            request,
            offers,
            progress,
        })
    }

    /// Auto-decline every pending offer on a funded request.
    ///
    /// Idempotent: only offers still `pending` change, and an unfunded or
    /// already swept request is a no-op.
    pub async fn sweep_competing_offers(&self, request_id: Uuid) -> FundingResult<SweepOutcome> {
        let auto_declined = self
            .retry
            .run("sweep_competing_offers", move || async move {
                let request = self.requests.get_by_id(request_id).await?;
                if request.status != RequestStatus::Funded {
                    return Ok(0);
                }
                self.offers
                    .auto_decline_pending(request_id, request.accepted_offer_id)
                    .await
            })
            .await?;

        if auto_declined > 0 {
            tracing::info!(
                request_id = %request_id,
                auto_declined,
                "Competing offers auto-declined"
            );
        }

        Ok(SweepOutcome {
            request_id,
            auto_declined,
        })
    }

    /// Finish sweeps left incomplete on funded requests
    pub async fn reconcile_sweeps(&self) -> FundingResult<ReconcileReport> {
        let funded = self
            .requests
            .find_all(&RequestFilter::with_status(RequestStatus::Funded))
            .await?;

        let with_pending: HashSet<Uuid> = self
            .store
            .query_offers(&OfferFilter {
                status: Some(OfferStatus::Pending),
                ..OfferFilter::default()
            })
            .await?
            .into_iter()
            .map(|o| o.loan_request_id)
            .collect();

        let stale: Vec<Uuid> = funded
            .into_iter()
            .filter(|r| with_pending.contains(&r.id))
            .map(|r| r.id)
            .collect();

        let mut report = ReconcileReport {
            requests_checked: stale.len(),
            ..ReconcileReport::default()
        };

        let results: Vec<FundingResult<SweepOutcome>> = stream::iter(stale)
            .map(|request_id| self.sweep_competing_offers(request_id))
            .buffer_unordered(RECONCILE_CONCURRENCY)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(outcome) => report.offers_auto_declined += outcome.auto_declined,
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(error = %e, "Sweep reconciliation failed for a request");
                }
            }
        }

        Ok(report)
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> FundingResult<LoanOffer> {
        self.offers.get_by_id(offer_id).await
    }

    pub async fn list_marketplace(
        &self,
        filter: &RequestFilter,
    ) -> FundingResult<PaginatedResponse<LoanRequest>> {
        self.requests.list_all(filter).await
    }

    pub async fn list_borrower_requests(
        &self,
        borrower_id: Uuid,
        status: Option<RequestStatus>,
    ) -> FundingResult<Vec<LoanRequest>> {
        self.requests.list_by_borrower(borrower_id, status).await
    }

    pub async fn list_lender_offers(&self, lender_id: Uuid) -> FundingResult<Vec<LoanOffer>> {
        self.offers.list_by_lender(lender_id).await
    }

    pub async fn borrower_dashboard(&self, borrower_id: Uuid) -> FundingResult<BorrowerDashboard> {
        let requests = self.requests.list_by_borrower(borrower_id, None).await?;

        let mut offers = Vec::new();
        for request in requests
            .iter()
            .filter(|r| r.status == RequestStatus::SeekingFunds)
        {
            offers.extend(self.offers.list_pending_by_request(request.id).await?);
        }

        Ok(BorrowerDashboard::build(borrower_id, requests, &offers))
    }
}
