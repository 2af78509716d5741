//! Funding workflow error taxonomy

use thiserror::Error;

use crate::ledger::StoreError;

/// Discriminated failure returned by every engine operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FundingError {
    /// Malformed or out-of-range input; fix the input, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// A precondition no longer holds; refresh and try again
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient store failure, retried with backoff before surfacing
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl FundingError {
    /// Stable error kind for the presentation layer
    pub fn kind(&self) -> &'static str {
        match self {
            FundingError::Validation(_) => "VALIDATION_ERROR",
            FundingError::Conflict(_) => "CONFLICT",
            FundingError::Authorization(_) => "AUTHORIZATION_ERROR",
            FundingError::NotFound(_) => "NOT_FOUND",
            FundingError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            FundingError::Store(_) => "STORE_ERROR",
        }
    }

    /// Only store-transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, FundingError::StoreUnavailable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FundingError::Validation(m)
            | FundingError::Conflict(m)
            | FundingError::Authorization(m)
            | FundingError::NotFound(m)
            | FundingError::StoreUnavailable(m)
            | FundingError::Store(m) => m,
        }
    }
}

impl From<StoreError> for FundingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => FundingError::StoreUnavailable(msg),
            StoreError::Backend(msg) => FundingError::Store(msg),
        }
    }
}

impl From<validator::ValidationErrors> for FundingError {
    fn from(err: validator::ValidationErrors) -> Self {
        FundingError::Validation(err.to_string())
    }
}

pub type FundingResult<T> = Result<T, FundingError>;
