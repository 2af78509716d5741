//! API handlers for the funding service

mod dashboard;
mod offers;
mod requests;

pub use dashboard::*;
pub use offers::*;
pub use requests::*;
