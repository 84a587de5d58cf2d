//! Data models for stored records and API request/response bodies.

/// Key record and lifecycle outcomes
pub mod key_record;
/// Rotation times and the settings schedule
pub mod schedule;
/// Monetized link bodies
pub mod link;
