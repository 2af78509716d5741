//! Middleware for the funding API
//!
//! This module provides request tracing and acting-user extraction.

pub mod auth;
mod tracing;

pub use auth::ActingUser;
pub use tracing::{request_tracing, REQUEST_ID_HEADER};
