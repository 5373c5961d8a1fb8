//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (Occurrence, Attendance, AttendanceCode)
//! - Domain value objects (OccurrenceKey, Code)
//! - Domain services (attendance code generation)
//! - Repository and store traits (interfaces)
//! - Notification port

pub mod entities;
pub mod notification;
pub mod repository;
pub mod services;
pub mod value_objects;
