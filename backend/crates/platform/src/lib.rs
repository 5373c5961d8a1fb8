//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Clock abstraction (system and manually driven)
//! - Cryptographic utilities (SHA-256, random short strings)
//! - Fixed-window failure rate limiting

pub mod clock;
pub mod crypto;
pub mod rate_limit;
