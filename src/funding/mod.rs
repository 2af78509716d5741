//! Funding workflow module
//!
//! The engine coordinating requests and offers, its error taxonomy, the
//! retry policy for store-transient failures and the sweep reconciler.

mod engine;
mod error;
mod retry;
mod sweeper;

pub use engine::{FundingEngine, ReconcileReport, RequestWithOffers, SweepOutcome};
pub use error::{FundingError, FundingResult};
pub use retry::RetryPolicy;
pub use sweeper::sweep_reconciler;
