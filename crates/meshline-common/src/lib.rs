//! Meshline Common - Shared types used across meshline components
//!
//! This crate provides:
//! - Error codes attached to log lines as the `err_code` field

pub mod error;

pub use error::ErrorCode;
