//! Loan offer models and DTOs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::funding::FundingError;
use crate::request::{fits_stored_precision, DECIMAL_PLACES, MAX_APR};

/// Offer lifecycle: `pending -> {accepted, declined, auto-declined}`
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "offer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    #[serde(rename = "auto-declined")]
    #[sqlx(rename = "auto-declined")]
    AutoDeclined,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Declined => "declined",
            OfferStatus::AutoDeclined => "auto-declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }

    /// Only `pending` may move, and only to a terminal state
    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        *self == OfferStatus::Pending && next.is_terminal()
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lender's proposed terms against a request
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanOffer {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub lender_id: Uuid,
    pub amount: Decimal,
    pub apr: Decimal,
    pub message: Option<String>,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for a lender making an offer
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanOffer {
    pub amount: Decimal,
    pub apr: Decimal,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
}

impl CreateLoanOffer {
    /// Validate offer terms; the request amount is the ceiling
    pub fn validate_terms(&self) -> Result<(), FundingError> {
        if self.amount <= Decimal::ZERO {
            return Err(FundingError::Validation(
                "Offer amount must be greater than 0".to_string(),
            ));
        }
        if self.apr <= Decimal::ZERO || self.apr > MAX_APR {
            return Err(FundingError::Validation(
                "APR must be greater than 0 and at most 100".to_string(),
            ));
        }
        if !fits_stored_precision(self.amount) || !fits_stored_precision(self.apr) {
            return Err(FundingError::Validation(format!(
                "Offer amount and APR allow at most {} decimal places",
                DECIMAL_PLACES
            )));
        }
        self.validate()?;
        Ok(())
    }

    /// Blank messages are stored as absent
    pub fn normalized_message(&self) -> Option<String> {
        self.message
            .as_ref()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

/// Field-equality query over offers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferFilter {
    pub loan_request_id: Option<Uuid>,
    pub lender_id: Option<Uuid>,
    pub status: Option<OfferStatus>,
}

impl OfferFilter {
    pub fn for_request(loan_request_id: Uuid) -> Self {
        Self {
            loan_request_id: Some(loan_request_id),
            ..Default::default()
        }
    }

    pub fn pending_for_request(loan_request_id: Uuid) -> Self {
        Self {
            loan_request_id: Some(loan_request_id),
            status: Some(OfferStatus::Pending),
            ..Default::default()
        }
    }

    pub fn for_lender(lender_id: Uuid) -> Self {
        Self {
            lender_id: Some(lender_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, offer: &LoanOffer) -> bool {
        self.loan_request_id.map_or(true, |id| offer.loan_request_id == id)
            && self.lender_id.map_or(true, |id| offer.lender_id == id)
            && self.status.map_or(true, |s| offer.status == s)
    }
}
