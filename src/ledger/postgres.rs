//! PostgreSQL ledger
//!
//! Transactions run at SERIALIZABLE isolation and lock the rows they read,
//! so concurrent accepts on the same request serialize on the request row.
//! Serialization failures and deadlocks surface as transient errors.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTransaction, OfferStatusUpdate, StoreError, StoreResult};
use crate::offer::{LoanOffer, OfferFilter};
use crate::request::{LoanRequest, RequestFilter};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Classify a sqlx error as transient or fatal
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Ledger backed by the `loan_requests` and `loan_offers` tables
#[derive(Clone)]
pub struct PgLedger {
    db_pool: PgPool,
}

impl PgLedger {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn insert_request(&self, request: &LoanRequest) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO loan_requests (
                id, borrower_id, title, story, tags, amount, max_apr, term,
                status, amount_funded, accepted_offer_id, final_apr,
                created_at, funded_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(request.borrower_id)
        .bind(&request.title)
        .bind(&request.story)
        .bind(&request.tags)
        .bind(request.amount)
        .bind(request.max_apr)
        .bind(request.term)
        .bind(request.status)
        .bind(request.amount_funded)
        .bind(request.accepted_offer_id)
        .bind(request.final_apr)
        .bind(request.created_at)
        .bind(request.funded_at)
        .bind(request.updated_at)
        .execute(&self.db_pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        sqlx::query_as::<_, LoanRequest>("SELECT * FROM loan_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn query_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LoanRequest>> {
        let mut query_builder: sqlx::QueryBuilder<Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM loan_requests WHERE 1=1");

        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }
        if let Some(borrower_id) = filter.borrower_id {
            query_builder.push(" AND borrower_id = ");
            query_builder.push_bind(borrower_id);
        }

        query_builder.push(" ORDER BY created_at DESC, id");

        query_builder
            .build_query_as::<LoanRequest>()
            .fetch_all(&self.db_pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_offer(&self, offer: &LoanOffer) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO loan_offers (
                id, loan_request_id, lender_id, amount, apr, message,
                status, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(offer.id)
        .bind(offer.loan_request_id)
        .bind(offer.lender_id)
        .bind(offer.amount)
        .bind(offer.apr)
        .bind(&offer.message)
        .bind(offer.status)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.db_pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<LoanOffer>> {
        sqlx::query_as::<_, LoanOffer>("SELECT * FROM loan_offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn query_offers(&self, filter: &OfferFilter) -> StoreResult<Vec<LoanOffer>> {
        let mut query_builder: sqlx::QueryBuilder<Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM loan_offers WHERE 1=1");

        if let Some(loan_request_id) = filter.loan_request_id {
            query_builder.push(" AND loan_request_id = ");
            query_builder.push_bind(loan_request_id);
        }
        if let Some(lender_id) = filter.lender_id {
            query_builder.push(" AND lender_id = ");
            query_builder.push_bind(lender_id);
        }
        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }

        query_builder.push(" ORDER BY created_at, id");

        query_builder
            .build_query_as::<LoanOffer>()
            .fetch_all(&self.db_pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        let mut tx = self.db_pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PgTransaction {
            tx,
            request_writes: Vec::new(),
            offer_writes: Vec::new(),
        }))
    }

    async fn apply_offer_batch(&self, updates: Vec<OfferStatusUpdate>) -> StoreResult<u64> {
        let mut tx = self.db_pool.begin().await.map_err(map_sqlx_error)?;
        let mut changed = 0;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE loan_offers
                SET status = $1, updated_at = $2, version = version + 1
                WHERE id = $3 AND status = $4
                "#,
            )
            .bind(update.status)
            .bind(update.updated_at)
            .bind(update.offer_id)
            .bind(update.expected)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            changed += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(changed)
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::db::check_health(&self.db_pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    request_writes: Vec<LoanRequest>,
    offer_writes: Vec<LoanOffer>,
}

#[async_trait]
impl LedgerTransaction for PgTransaction {
    async fn get_request(&mut self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        if let Some(pending) = self.request_writes.iter().rev().find(|r| r.id == id) {
            return Ok(Some(pending.clone()));
        }
        sqlx::query_as::<_, LoanRequest>("SELECT * FROM loan_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn get_offer(&mut self, id: Uuid) -> StoreResult<Option<LoanOffer>> {
        if let Some(pending) = self.offer_writes.iter().rev().find(|o| o.id == id) {
            return Ok(Some(pending.clone()));
        }
        sqlx::query_as::<_, LoanOffer>("SELECT * FROM loan_offers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    fn put_request(&mut self, request: LoanRequest) {
        self.request_writes.push(request);
    }

    fn put_offer(&mut self, offer: LoanOffer) {
        self.offer_writes.push(offer);
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTransaction {
            mut tx,
            request_writes,
            offer_writes,
        } = *self;

        // Only lifecycle columns change after creation
        for request in request_writes {
            sqlx::query(
                r#"
                UPDATE loan_requests
                SET status = $1, amount_funded = $2, accepted_offer_id = $3,
                    final_apr = $4, funded_at = $5, updated_at = $6,
                    version = version + 1
                WHERE id = $7
                "#,
            )
            .bind(request.status)
            .bind(request.amount_funded)
            .bind(request.accepted_offer_id)
            .bind(request.final_apr)
            .bind(request.funded_at)
            .bind(request.updated_at)
            .bind(request.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        for offer in offer_writes {
            sqlx::query(
                r#"
                UPDATE loan_offers
                SET status = $1, updated_at = $2, version = version + 1
                WHERE id = $3
                "#,
            )
            .bind(offer.status)
            .bind(offer.updated_at)
            .bind(offer.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_missing_row_is_fatal() {
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_transient());
    }
}
