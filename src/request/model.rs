//! Loan request models and DTOs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::funding::FundingError;

pub const MAX_APR: Decimal = Decimal::ONE_HUNDRED;

/// Decimal places kept by the amount and APR columns
pub const DECIMAL_PLACES: u32 = 4;

/// Largest value a `NUMERIC(20, 4)` amount column holds
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_999, DECIMAL_PLACES)
}

/// True when `value` is stored without rounding; trailing zeros are ignored
pub fn fits_stored_precision(value: Decimal) -> bool {
    value.normalize().scale() <= DECIMAL_PLACES && value <= max_amount()
}

/// Request lifecycle: `seekingFunds -> funded`, terminal once funded
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "request_status")]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    #[sqlx(rename = "seekingFunds")]
    SeekingFunds,
    #[sqlx(rename = "funded")]
    Funded,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::SeekingFunds => "seekingFunds",
            RequestStatus::Funded => "funded",
        }
    }
}

/// Borrower's ask for funding
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanRequest {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub title: String,
    pub story: String,
    pub tags: Vec<String>,
    pub amount: Decimal,
    #[serde(rename = "maxAPR")]
    pub max_apr: Decimal,
    pub term: i32,
    pub status: RequestStatus,
    pub amount_funded: Decimal,
    pub accepted_offer_id: Option<Uuid>,
    #[serde(rename = "finalAPR")]
    pub final_apr: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRequest {
    pub fn is_funded(&self) -> bool {
        self.status == RequestStatus::Funded
    }

    /// Check the funding invariants that tie status, amount and accepted offer together
    pub fn is_consistent(&self) -> bool {
        let funded = self.is_funded();
        self.amount_funded <= self.amount
            && funded == self.accepted_offer_id.is_some()
            && funded == (self.amount_funded > Decimal::ZERO)
            && funded == self.final_apr.is_some()
            && funded == self.funded_at.is_some()
    }

    /// Text used by marketplace search
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        self.title.to_lowercase().contains(&needle)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
            || self.amount.normalize().to_string().contains(&needle)
            || self.max_apr.normalize().to_string().contains(&needle)
    }
}

/// Payload for a borrower submitting a new request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    pub amount: Decimal,
    #[serde(rename = "maxAPR")]
    pub max_apr: Decimal,
    pub term: i32,
    #[validate(length(min = 1, max = 60))]
    pub title: String,
    #[validate(length(min = 50, max = 2000))]
    pub story: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreateLoanRequest {
    /// Trim free text and drop empty tags
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.story = self.story.trim().to_string();
        self.tags = self
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
        self
    }

    /// Validate request terms
    pub fn validate_terms(&self) -> Result<(), FundingError> {
        if self.amount <= Decimal::ZERO {
            return Err(FundingError::Validation(
                "Amount must be greater than 0".to_string(),
            ));
        }
        if !fits_stored_precision(self.amount) {
            return Err(FundingError::Validation(format!(
                "Amount must be below 10^16 with at most {} decimal places",
                DECIMAL_PLACES
            )));
        }
        if self.max_apr <= Decimal::ZERO || self.max_apr > MAX_APR {
            return Err(FundingError::Validation(
                "Max APR must be greater than 0 and at most 100".to_string(),
            ));
        }
        if !fits_stored_precision(self.max_apr) {
            return Err(FundingError::Validation(format!(
                "Max APR must have at most {} decimal places",
                DECIMAL_PLACES
            )));
        }
        if self.term <= 0 {
            return Err(FundingError::Validation(
                "Term must be a positive number of months".to_string(),
            ));
        }
        self.validate()?;
        Ok(())
    }
}

/// Query filter for listing requests
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub borrower_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl RequestFilter {
    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn for_borrower(borrower_id: Uuid, status: Option<RequestStatus>) -> Self {
        Self {
            borrower_id: Some(borrower_id),
            status,
            ..Default::default()
        }
    }

    /// Page number and page size after clamping
    pub fn paging(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).clamp(1, i32::MAX as u32);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }

    pub fn matches(&self, request: &LoanRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(borrower_id) = self.borrower_id {
            if request.borrower_id != borrower_id {
                return false;
            }
        }
        match &self.search {
            Some(needle) => request.matches_search(needle),
            None => true,
        }
    }
}
