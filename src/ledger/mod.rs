//! Ledger Store abstraction
//!
//! The durable store behind the funding workflow. It offers point reads,
//! field-equality queries, serializable read-then-write transactions across
//! requests and offers, and a batch primitive for conditional offer updates.

use async_trait::async_trait;
use sqlx::types::chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::offer::{LoanOffer, OfferFilter, OfferStatus};
use crate::request::{LoanRequest, RequestFilter};

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Store-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Isolation abort, version conflict, network or pool failure. Safe to retry.
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conditional status change applied by [`LedgerStore::apply_offer_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferStatusUpdate {
    pub offer_id: Uuid,
    pub expected: OfferStatus,
    pub status: OfferStatus,
    pub updated_at: DateTime<Utc>,
}

/// A serializable read-then-write unit of work.
///
/// Reads observe committed state; writes are buffered and become visible
/// atomically on [`commit`](LedgerTransaction::commit). Dropping a transaction
/// without committing discards it.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn get_request(&mut self, id: Uuid) -> StoreResult<Option<LoanRequest>>;

    async fn get_offer(&mut self, id: Uuid) -> StoreResult<Option<LoanOffer>>;

    fn put_request(&mut self, request: LoanRequest);

    fn put_offer(&mut self, offer: LoanOffer);

    /// Commit buffered writes; fails with [`StoreError::Transient`] if anything
    /// read by this transaction changed underneath it.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert unless a request with the same id exists; `false` when nothing was written
    async fn insert_request(&self, request: &LoanRequest) -> StoreResult<bool>;

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<LoanRequest>>;

    /// Requests matching `status` and `borrower_id`; text search and paging
    /// are applied by the repository.
    async fn query_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LoanRequest>>;

    /// Insert unless an offer with the same id exists; `false` when nothing was written
    async fn insert_offer(&self, offer: &LoanOffer) -> StoreResult<bool>;

    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<LoanOffer>>;

    async fn query_offers(&self, filter: &OfferFilter) -> StoreResult<Vec<LoanOffer>>;

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>>;

    /// Apply all updates atomically. Updates whose offer is no longer in the
    /// `expected` status are skipped. Returns the number of offers changed.
    async fn apply_offer_batch(&self, updates: Vec<OfferStatusUpdate>) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
}
