//! Micro-lending funding service library
//!
//! This library exports the core modules for the funding workflow server:
//! the Ledger Store, request and offer repositories, the Funding Workflow
//! Engine and the HTTP surface over it.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod funding;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod offer;
pub mod projections;
pub mod request;
pub mod routes;
pub mod state;
