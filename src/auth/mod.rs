//! Authentication module for the funding service
//!
//! Identities are issued by an external identity provider as HS256 JWTs.
//! This service only verifies them; it never stores credentials.

mod jwt;

pub use jwt::{issue_token, verify_token, Claims, JwtError, TokenVerifier};
