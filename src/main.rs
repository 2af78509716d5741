//! Micro-lending funding server
//!
//! Serves the funding workflow API: borrowers post loan requests, lenders
//! make offers, borrowers accept or decline them.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use microlend_server::auth::TokenVerifier;
use microlend_server::config::{Config, StoreBackend};
use microlend_server::db;
use microlend_server::funding::{sweep_reconciler, FundingEngine};
use microlend_server::ledger::{LedgerStore, MemoryLedger, PgLedger};
use microlend_server::routes;
use microlend_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        store = config.store_backend.as_str(),
        "Starting funding server"
    );

    let store: Arc<dyn LedgerStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::open_ledger_pool(&config).await?;
            Arc::new(PgLedger::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger store; state is lost on restart");
            Arc::new(MemoryLedger::new())
        }
    };

    let engine = Arc::new(FundingEngine::new(store, config.retry_policy()));
    let token_verifier = Arc::new(TokenVerifier::new(config.jwt_secret.clone()));
    let app_state = AppState::new(engine.clone(), token_verifier);

    // Start sweep reconciler in background
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        sweep_reconciler(engine, sweep_interval).await;
        tracing::error!("Sweep reconciler task exited unexpectedly");
    });

    let app = routes::app_router(app_state).layer(configure_cors(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
