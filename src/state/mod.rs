//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::TokenVerifier;
use crate::funding::FundingEngine;
use crate::ledger::LedgerStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FundingEngine>,
    pub store: Arc<dyn LedgerStore>,
    pub token_verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(engine: Arc<FundingEngine>, token_verifier: Arc<TokenVerifier>) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
            token_verifier,
        }
    }
}

impl FromRef<AppState> for Arc<FundingEngine> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.engine.clone()
    }
}

impl FromRef<AppState> for Arc<dyn LedgerStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.token_verifier.clone()
    }
}
