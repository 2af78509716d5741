//! Background reconciliation of incomplete auto-decline sweeps

use std::sync::Arc;
use std::time::Duration;

use super::engine::FundingEngine;

/// Background job that finishes sweeps left pending on funded requests
pub async fn sweep_reconciler(engine: Arc<FundingEngine>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting sweep reconciler");

    loop {
        tokio::time::sleep(interval).await;

        match engine.reconcile_sweeps().await {
            Ok(report) if report.requests_checked > 0 => {
                tracing::info!(
                    requests = report.requests_checked,
                    auto_declined = report.offers_auto_declined,
                    failures = report.failures,
                    "Reconciled competing offers on funded requests"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error reconciling sweeps");
            }
        }
    }
}
