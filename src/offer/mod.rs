//! Loan offer domain module
//!
//! Contains the offer model, DTOs and the Offer Repository.

mod model;
mod repository;

pub use model::*;
pub use repository::OfferRepository;
