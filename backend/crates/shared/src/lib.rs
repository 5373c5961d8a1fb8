//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the vocabulary every check-in crate agrees on:
//! - Unified error type ([`error::app_error::AppError`]) and its classification
//! - Typed identifiers for records and the external references they carry
//!
//! **Design Principle**: Only include things that are "hard to change"
//! and have consistent meaning across all domains.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
