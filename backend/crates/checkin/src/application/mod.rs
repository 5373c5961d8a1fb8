//! Application Layer - Use Cases
//!
//! This layer orchestrates domain logic and infrastructure.
//! Contains the unit of work, the occurrence resolver, the attendance code
//! index and the check-in use cases built on them.

pub mod attendance_codes;
pub mod check_in;
pub mod check_out;
pub mod config;
pub mod resolve_occurrence;
pub mod unit_of_work;
pub mod verify_pickup;
