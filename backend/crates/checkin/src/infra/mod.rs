//! Infrastructure Layer
//!
//! Store implementations (PostgreSQL, in-memory) and the default notifier.

pub mod memory;
pub mod notifier;
pub mod postgres;
