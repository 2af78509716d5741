//! Read-side projections for dashboards and request detail pages
//!
//! Pure functions over repository data; nothing here touches the store.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::offer::{LoanOffer, OfferStatus};
use crate::request::{LoanRequest, RequestStatus};

const MONTHS_PER_YEAR: Decimal = Decimal::from_parts(12, 0, 0, false, 0);

/// How far a request is towards its goal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingProgress {
    pub goal: Decimal,
    pub funded: Decimal,
    pub amount_needed: Decimal,
    /// 0..=100, two decimal places
    pub percentage: Decimal,
}

impl FundingProgress {
    pub fn for_request(request: &LoanRequest) -> Self {
        let goal = request.amount;
        let funded = request.amount_funded;
        Self {
            goal,
            funded,
            amount_needed: (goal - funded).max(Decimal::ZERO),
            percentage: percentage_of(funded, goal),
        }
    }
}

/// Repayments recorded elsewhere, fed into the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentProgress {
    pub months_paid: i32,
    pub amount_paid: Decimal,
}

/// Repayment outlook for a funded loan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentPlan {
    pub request_id: Uuid,
    pub principal: Decimal,
    pub apr: Decimal,
    pub term_months: i32,
    pub months_paid: i32,
    pub months_remaining: i32,
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
    /// Interest on the remaining balance for one month plus an equal share of principal
    pub next_payment_amount: Decimal,
    pub paid_percentage: Decimal,
    pub term_progress_percentage: Decimal,
}

impl RepaymentPlan {
    /// `None` unless the request is funded
    pub fn for_request(request: &LoanRequest, progress: RepaymentProgress) -> Option<Self> {
        let apr = request.final_apr?;
        if request.status != RequestStatus::Funded {
            return None;
        }

        let principal = request.amount_funded;
        let term_months = request.term.max(1);
        let months_paid = progress.months_paid.clamp(0, term_months);
        let amount_paid = progress.amount_paid.max(Decimal::ZERO).min(principal);
        let amount_remaining = principal - amount_paid;

        Some(Self {
            request_id: request.id,
            principal,
            apr,
            term_months,
            months_paid,
            months_remaining: term_months - months_paid,
            amount_paid,
            amount_remaining,
            next_payment_amount: monthly_payment(amount_remaining, apr, term_months),
            paid_percentage: percentage_of(amount_paid, principal),
            term_progress_percentage: percentage_of(
                Decimal::from(months_paid),
                Decimal::from(term_months),
            ),
        })
    }
}

/// One seeking request with how many offers are waiting on it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekingRequestSummary {
    pub request: LoanRequest,
    pub pending_offers: usize,
    pub progress: FundingProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundedLoanSummary {
    pub request: LoanRequest,
    pub repayment: RepaymentPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowerDashboard {
    pub borrower_id: Uuid,
    pub seeking: Vec<SeekingRequestSummary>,
    pub funded: Vec<FundedLoanSummary>,
    pub total_pending_offers: usize,
    pub total_funded: Decimal,
}

impl BorrowerDashboard {
    /// Build from a borrower's requests and all offers against them
    pub fn build(borrower_id: Uuid, requests: Vec<LoanRequest>, offers: &[LoanOffer]) -> Self {
        let mut pending_by_request: HashMap<Uuid, usize> = HashMap::new();
        for offer in offers.iter().filter(|o| o.status == OfferStatus::Pending) {
            *pending_by_request.entry(offer.loan_request_id).or_default() += 1;
        }

        let mut seeking = Vec::new();
        let mut funded = Vec::new();

        for request in requests {
            if request.borrower_id != borrower_id {
                continue;
            }
            match request.status {
                RequestStatus::SeekingFunds => {
                    let pending_offers = pending_by_request.get(&request.id).copied().unwrap_or(0);
                    seeking.push(SeekingRequestSummary {
                        progress: FundingProgress::for_request(&request),
                        pending_offers,
                        request,
                    });
                }
                RequestStatus::Funded => {
                    if let Some(repayment) =
                        RepaymentPlan::for_request(&request, RepaymentProgress::default())
                    {
                        funded.push(FundedLoanSummary { request, repayment });
                    }
                }
            }
        }

        let total_pending_offers = seeking.iter().map(|s| s.pending_offers).sum();
        let total_funded = funded.iter().map(|f| f.request.amount_funded).sum();

        Self {
            borrower_id,
            seeking,
            funded,
            total_pending_offers,
            total_funded,
        }
    }
}

/// `part / whole * 100` clamped to 0..=100, 0 for an empty whole
pub fn percentage_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (part / whole * Decimal::ONE_HUNDRED)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Next instalment for a balance: monthly interest plus principal spread over the term
pub fn monthly_payment(remaining: Decimal, apr: Decimal, term_months: i32) -> Decimal {
    if remaining <= Decimal::ZERO || term_months <= 0 {
        return Decimal::ZERO;
    }
    let interest = remaining * (apr / Decimal::ONE_HUNDRED) / MONTHS_PER_YEAR;
    let principal = remaining / Decimal::from(term_months);
    (interest + principal).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
