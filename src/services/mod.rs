//! Business logic services.
//!
//! Services contain the key lifecycle logic separated from HTTP handlers.

pub mod key_generator;
pub mod key_manager;
pub mod link_service;
pub mod rotation_worker;
pub mod scheduler;
