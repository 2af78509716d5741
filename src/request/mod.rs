//! Loan request domain module
//!
//! Contains the request model, DTOs and the Request Repository.

mod model;
mod repository;

pub use model::*;
pub use repository::RequestRepository;
