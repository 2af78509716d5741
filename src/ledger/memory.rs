//! In-process ledger with optimistic concurrency control
//!
//! Every document carries a version. A transaction remembers the version of
//! each document it read and its commit is rejected as transient if any of
//! them moved, which gives serializable behaviour for the read-then-write
//! pattern used by the funding workflow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{LedgerStore, LedgerTransaction, OfferStatusUpdate, StoreError, StoreResult};
use crate::offer::{LoanOffer, OfferFilter};
use crate::request::{LoanRequest, RequestFilter};

#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    doc: T,
}

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<Uuid, Versioned<LoanRequest>>,
    offers: HashMap<Uuid, Versioned<LoanOffer>>,
}

/// Injected failures, consumed one per call
#[derive(Debug, Default)]
struct Faults {
    commit_failures: u32,
    batch_failures: u32,
    lost_insert_replies: u32,
    unavailable: bool,
}

/// Ledger held entirely in memory; clones share the same tables
#[derive(Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` transaction commits fail with a transient error
    pub async fn fail_next_commits(&self, count: u32) {
        self.faults.lock().await.commit_failures = count;
    }

    /// Make the next `count` batch writes fail with a transient error
    pub async fn fail_next_batches(&self, count: u32) {
        self.faults.lock().await.batch_failures = count;
    }

    /// Apply the next `count` inserts but report them as transient failures
    pub async fn lose_next_insert_replies(&self, count: u32) {
        self.faults.lock().await.lost_insert_replies = count;
    }

    /// Reject every operation with a transient error until cleared
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().await.unavailable = unavailable;
    }

    async fn ensure_available(&self) -> StoreResult<()> {
        if self.faults.lock().await.unavailable {
            return Err(StoreError::Transient("ledger unavailable".to_string()));
        }
        Ok(())
    }

    async fn take_commit_failure(&self) -> bool {
        let mut faults = self.faults.lock().await;
        if faults.commit_failures > 0 {
            faults.commit_failures -= 1;
            true
        } else {
            false
        }
    }

    async fn take_lost_insert_reply(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock().await;
        if faults.lost_insert_replies > 0 {
            faults.lost_insert_replies -= 1;
            return Err(StoreError::Transient(
                "connection reset after insert".to_string(),
            ));
        }
        Ok(())
    }

    async fn take_batch_failure(&self) -> bool {
        let mut faults = self.faults.lock().await;
        if faults.batch_failures > 0 {
            faults.batch_failures -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_request(&self, request: &LoanRequest) -> StoreResult<bool> {
        self.ensure_available().await?;
        {
            let mut tables = self.tables.write().await;
            if tables.requests.contains_key(&request.id) {
                return Ok(false);
            }
            tables.requests.insert(
                request.id,
                Versioned {
                    version: 1,
                    doc: request.clone(),
                },
            );
        }
        self.take_lost_insert_reply().await?;
        Ok(true)
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        self.ensure_available().await?;
        let tables = self.tables.read().await;
        Ok(tables.requests.get(&id).map(|v| v.doc.clone()))
    }

    async fn query_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LoanRequest>> {
        self.ensure_available().await?;
        let tables = self.tables.read().await;
        let mut requests: Vec<LoanRequest> = tables
            .requests
            .values()
            .map(|v| &v.doc)
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.borrower_id.map_or(true, |b| r.borrower_id == b))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn insert_offer(&self, offer: &LoanOffer) -> StoreResult<bool> {
        self.ensure_available().await?;
        {
            let mut tables = self.tables.write().await;
            if tables.offers.contains_key(&offer.id) {
                return Ok(false);
            }
            tables.offers.insert(
                offer.id,
                Versioned {
                    version: 1,
                    doc: offer.clone(),
                },
            );
        }
        self.take_lost_insert_reply().await?;
        Ok(true)
    }

    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<LoanOffer>> {
        self.ensure_available().await?;
        let tables = self.tables.read().await;
        Ok(tables.offers.get(&id).map(|v| v.doc.clone()))
    }

    async fn query_offers(&self, filter: &OfferFilter) -> StoreResult<Vec<LoanOffer>> {
        self.ensure_available().await?;
        let tables = self.tables.read().await;
        let mut offers: Vec<LoanOffer> = tables
            .offers
            .values()
            .map(|v| &v.doc)
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(offers)
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        self.ensure_available().await?;
        Ok(Box::new(MemoryTransaction {
            ledger: self.clone(),
            request_reads: HashMap::new(),
            offer_reads: HashMap::new(),
            request_writes: HashMap::new(),
            offer_writes: HashMap::new(),
        }))
    }

    async fn apply_offer_batch(&self, updates: Vec<OfferStatusUpdate>) -> StoreResult<u64> {
        self.ensure_available().await?;
        if self.take_batch_failure().await {
            return Err(StoreError::Transient(
                "injected batch write failure".to_string(),
            ));
        }

        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for update in updates {
            if let Some(entry) = tables.offers.get_mut(&update.offer_id) {
                if entry.doc.status == update.expected {
                    entry.doc.status = update.status;
                    entry.doc.updated_at = update.updated_at;
                    entry.version += 1;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available().await
    }
}

struct MemoryTransaction {
    ledger: MemoryLedger,
    request_reads: HashMap<Uuid, Option<u64>>,
    offer_reads: HashMap<Uuid, Option<u64>>,
    request_writes: HashMap<Uuid, LoanRequest>,
    offer_writes: HashMap<Uuid, LoanOffer>,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn get_request(&mut self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        if let Some(pending) = self.request_writes.get(&id) {
            return Ok(Some(pending.clone()));
        }
        self.ledger.ensure_available().await?;
        let tables = self.ledger.tables.read().await;
        let entry = tables.requests.get(&id);
        self.request_reads
            .entry(id)
            .or_insert_with(|| entry.map(|v| v.version));
        Ok(entry.map(|v| v.doc.clone()))
    }

    async fn get_offer(&mut self, id: Uuid) -> StoreResult<Option<LoanOffer>> {
        if let Some(pending) = self.offer_writes.get(&id) {
            return Ok(Some(pending.clone()));
        }
        self.ledger.ensure_available().await?;
        let tables = self.ledger.tables.read().await;
        let entry = tables.offers.get(&id);
        self.offer_reads
            .entry(id)
            .or_insert_with(|| entry.map(|v| v.version));
        Ok(entry.map(|v| v.doc.clone()))
    }

    fn put_request(&mut self, request: LoanRequest) {
        self.request_writes.insert(request.id, request);
    }

    fn put_offer(&mut self, offer: LoanOffer) {
        self.offer_writes.insert(offer.id, offer);
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            ledger,
            request_reads,
            offer_reads,
            request_writes,
            offer_writes,
        } = *self;

        ledger.ensure_available().await?;
        if ledger.take_commit_failure().await {
            return Err(StoreError::Transient(
                "injected transaction abort".to_string(),
            ));
        }

        let mut tables = ledger.tables.write().await;

        for (id, seen) in &request_reads {
            let current = tables.requests.get(id).map(|v| v.version);
            if current != *seen {
                return Err(StoreError::Transient(format!(
                    "loan request {} changed during transaction",
                    id
                )));
            }
        }
        for (id, seen) in &offer_reads {
            let current = tables.offers.get(id).map(|v| v.version);
            if current != *seen {
                return Err(StoreError::Transient(format!(
                    "loan offer {} changed during transaction",
                    id
                )));
            }
        }

        for (id, doc) in request_writes {
            let version = tables.requests.get(&id).map_or(0, |v| v.version) + 1;
            tables.requests.insert(id, Versioned { version, doc });
        }
        for (id, doc) in offer_writes {
            let version = tables.offers.get(&id).map_or(0, |v| v.version) + 1;
            tables.offers.insert(id, Versioned { version, doc });
        }

        Ok(())
    }
}
