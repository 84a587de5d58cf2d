//! HTTP request handlers (route handlers).
//!
//! Each handler extracts request data, calls the key manager and returns
//! a JSON response.

/// Service health endpoint
pub mod health;
/// Key lifecycle endpoints
pub mod keys;
/// Monetized link endpoint
pub mod links;
/// Lookup endpoints
pub mod lookup;
/// Rotation schedule endpoints
pub mod schedule;
