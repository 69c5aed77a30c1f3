//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by caller.

pub mod admin;
pub mod health;
pub mod payments;
pub mod raffles;
pub mod webhook;

// Re-export common handler utilities
pub use health::{health_check, readiness_check};
