//! Postgres pool behind `PgLedger`
//!
//! Only opened when `STORE_BACKEND=postgres`; the memory backend never
//! touches a database. Opening the pool also applies the funding schema in
//! `migrations/` so a fresh database is usable straight away.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

/// Ledger requests fail fast instead of queueing behind a saturated pool;
/// the funding retry policy decides whether to try again.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is required for the postgres ledger")]
    MissingDatabaseUrl,

    #[error("Failed to connect to the ledger database: {0}")]
    Connect(String),

    #[error("Failed to apply the funding schema: {0}")]
    Migrate(String),

    #[error("Ledger tables unreachable: {0}")]
    Unhealthy(String),
}

/// Connect to the ledger database and bring its schema up to date
pub async fn open_ledger_pool(config: &Config) -> Result<PgPool, DbError> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or(DbError::MissingDatabaseUrl)?;

    tracing::info!(
        url = %config.database_url_masked(),
        max_connections = config.db_max_connections,
        "Opening ledger pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| DbError::Connect(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| DbError::Migrate(e.to_string()))?;

    tracing::info!("Ledger schema is up to date");
    Ok(pool)
}

/// Probe the loan tables rather than the bare connection, so an unmigrated
/// database reports unhealthy.
pub async fn check_health(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1 FROM loan_requests LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| DbError::Unhealthy(e.to_string()))?;
    Ok(())
}
