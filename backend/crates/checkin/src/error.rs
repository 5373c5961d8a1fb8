//! Check-in Error Types
//!
//! This module provides check-in specific error variants that integrate
//! with the unified `kernel::error::AppError` system.

use crate::domain::value_objects::OccurrenceKey;
use chrono::{DateTime, NaiveDate, Utc};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use kernel::id::{OccurrenceId, PersonId};
use platform::rate_limit::RateLimitError;
use thiserror::Error;

/// Check-in result type alias
pub type CheckinResult<T> = Result<T, CheckinError>;

/// Check-in error variants
///
/// Unique-constraint conflicts on insert are not errors; they surface as
/// `AddOutcome::Conflict` and the occurrence resolver recovers from them.
/// A code lookup miss is `Ok(None)`.
#[derive(Debug, Error)]
pub enum CheckinError {
    /// `begin` on a unit of work that already has an open transaction
    #[error("A transaction is already in progress")]
    AlreadyInProgress,

    /// Repository access, commit or rollback without an open transaction
    #[error("No transaction in progress")]
    NoTransactionInProgress,

    /// Inserts conflicted but the winning row never became readable
    #[error("Occurrence {key} conflicted {conflicts} time(s) but no row is visible")]
    SchemaInvariantViolation { key: OccurrenceKey, conflicts: u32 },

    /// Too many failed pickup verifications for this subject
    #[error("Too many failed attempts, retry after {retry_after_ms} ms")]
    RateLimitExceeded { retry_after_ms: i64 },

    /// Checkout requested for a person with no open attendance
    #[error("Person {person_id} is not checked in to occurrence {occurrence_id}")]
    NotCheckedIn {
        occurrence_id: OccurrenceId,
        person_id: PersonId,
    },

    /// Checkout time precedes check-in time
    #[error("Checkout at {ended_at} precedes check-in at {started_at}")]
    InvalidCheckout {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },

    /// Every generated code collided with an existing one
    #[error("No free attendance code for {issue_date} after {attempts} attempts")]
    CodeSpaceExhausted { issue_date: NaiveDate, attempts: u32 },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure counter backend error
    #[error("Rate limit store error: {0}")]
    RateLimitStore(#[from] RateLimitError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckinError {
    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckinError::RateLimitExceeded { .. } => ErrorKind::TooManyRequests,
            CheckinError::NotCheckedIn { .. } => ErrorKind::UnprocessableEntity,
            CheckinError::InvalidCheckout { .. } => ErrorKind::BadRequest,
            CheckinError::CodeSpaceExhausted { .. } => ErrorKind::ServiceUnavailable,
            CheckinError::Database(e) => match e {
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::ServiceUnavailable,
                e if kernel::error::conversions::is_unique_violation(e) => ErrorKind::Conflict,
                _ => ErrorKind::InternalServerError,
            },
            CheckinError::AlreadyInProgress
            | CheckinError::NoTransactionInProgress
            | CheckinError::SchemaInvariantViolation { .. }
            | CheckinError::Config(_)
            | CheckinError::RateLimitStore(_)
            | CheckinError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            CheckinError::Database(e) => {
                tracing::error!(error = %e, "Check-in database error");
            }
            CheckinError::SchemaInvariantViolation { key, conflicts } => {
                tracing::error!(
                    key = %key,
                    conflicts = conflicts,
                    "Occurrence uniqueness invariant violated"
                );
            }
            CheckinError::AlreadyInProgress | CheckinError::NoTransactionInProgress => {
                tracing::error!(error = %self, "Unit of work misuse");
            }
            CheckinError::Internal(msg) => {
                tracing::error!(message = %msg, "Check-in internal error");
            }
            CheckinError::RateLimitExceeded { retry_after_ms } => {
                tracing::warn!(retry_after_ms = retry_after_ms, "Pickup verification throttled");
            }
            _ => {
                tracing::debug!(error = %self, "Check-in error");
            }
        }
    }
}

impl From<CheckinError> for AppError {
    fn from(err: CheckinError) -> Self {
        err.log();
        match err {
            CheckinError::Database(e) => AppError::from(e),
            CheckinError::RateLimitExceeded { .. } => {
                AppError::too_many_requests(err.to_string()).with_action("Try again later")
            }
            CheckinError::NotCheckedIn { .. } => {
                AppError::unprocessable(err.to_string()).with_action("Check in before checking out")
            }
            other => AppError::new(other.kind(), other.to_string()),
        }
    }
}
