//! Check-in Coordination Core
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, repository and notification traits
//! - `application/` - Unit of work, occurrence resolver, code index, use cases
//! - `infra/` - PostgreSQL and in-memory stores, logging notifier
//!
//! ## Consistency Model
//! - Exactly one occurrence per (group, date, schedule): the storage unique
//!   constraint decides, the resolver re-reads after a conflict
//! - Occurrence, attendance and code of one check-in commit together or not at all
//! - Attendance codes are unique within their issue date only
//! - Failed pickup verifications are counted per subject in a fixed window;
//!   a blocked subject is refused without being counted again

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;

// Re-exports for convenience
pub use application::attendance_codes::{AttendanceCodeIndex, CodeMatch};
pub use application::check_in::{CheckInInput, CheckInOutcome, CheckInUseCase};
pub use application::check_out::CheckOutUseCase;
pub use application::config::CheckinConfig;
pub use application::resolve_occurrence::{OccurrenceResolver, Resolution};
pub use application::unit_of_work::UnitOfWork;
pub use application::verify_pickup::{PickupOutcome, VerifyPickupInput, VerifyPickupUseCase};
pub use error::{CheckinError, CheckinResult};
pub use infra::memory::MemoryStore;
pub use infra::notifier::TracingNotifier;
pub use infra::postgres::{PgCheckinStore, PgFailureCounterStore};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};
