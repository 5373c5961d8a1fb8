//! Attendance Code Index
//!
//! Issues short codes scoped to an issue date and answers the read paths
//! around them: code to attendance, open attendance per person, head count
//! and history. All calls run inside the caller's unit of work.

use crate::application::unit_of_work::UnitOfWork;
use crate::domain::entities::{Attendance, AttendanceCode};
use crate::domain::repository::{AddOutcome, AttendanceCodeFilter, AttendanceFilter, Store};
use crate::domain::services::generate_code;
use crate::domain::value_objects::Code;
use crate::error::{CheckinError, CheckinResult};
use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{AttendanceId, OccurrenceId, PersonId};

/// A code together with the attendance it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMatch {
    pub code: AttendanceCode,
    /// `None` for unlinked codes or when the attendance row is gone
    pub attendance: Option<Attendance>,
}

/// Attendance Code Index
#[derive(Debug, Clone, Copy)]
pub struct AttendanceCodeIndex {
    code_length: usize,
    max_issue_attempts: u32,
}

impl AttendanceCodeIndex {
    pub fn new(code_length: usize, max_issue_attempts: u32) -> Self {
        Self {
            code_length,
            max_issue_attempts: max_issue_attempts.max(1),
        }
    }

    /// Generate and persist a code unique within `issue_date`.
    ///
    /// A collision with an existing code regenerates; after
    /// `max_issue_attempts` collisions the call fails with
    /// `CodeSpaceExhausted`.
    pub async fn issue_code<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        issue_date: NaiveDate,
        attendance_id: Option<AttendanceId>,
        now: DateTime<Utc>,
    ) -> CheckinResult<AttendanceCode> {
        let mut codes = uow.repository::<AttendanceCode>()?;

        for attempt in 1..=self.max_issue_attempts {
            let candidate =
                AttendanceCode::new(issue_date, generate_code(self.code_length), attendance_id, now);
            match codes.add(&candidate).await? {
                AddOutcome::Added => {
                    tracing::debug!(
                        code_id = %candidate.id,
                        issue_date = %issue_date,
                        attempt = attempt,
                        "Attendance code issued"
                    );
                    return Ok(candidate);
                }
                AddOutcome::Conflict => {
                    tracing::debug!(issue_date = %issue_date, attempt = attempt, "Code collision");
                }
            }
        }

        tracing::error!(
            issue_date = %issue_date,
            attempts = self.max_issue_attempts,
            "No free attendance code"
        );
        Err(CheckinError::CodeSpaceExhausted {
            issue_date,
            attempts: self.max_issue_attempts,
        })
    }

    /// Reverse lookup. Input is normalized first; anything that cannot be a
    /// code is a miss.
    pub async fn lookup<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        issue_date: NaiveDate,
        raw_code: &str,
    ) -> CheckinResult<Option<CodeMatch>> {
        let Some(code) = Code::normalize(raw_code) else {
            return Ok(None);
        };

        let found = uow
            .repository::<AttendanceCode>()?
            .find_one(&AttendanceCodeFilter::Exact { issue_date, code })
            .await?;
        let Some(code) = found else {
            return Ok(None);
        };

        let attendance = match code.attendance_id {
            Some(id) => uow.repository::<Attendance>()?.get(id).await?,
            None => None,
        };
        Ok(Some(CodeMatch { code, attendance }))
    }

    /// Codes of `issue_date` starting with `prefix`, in code order
    pub async fn search_prefix<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        issue_date: NaiveDate,
        prefix: &str,
        limit: usize,
    ) -> CheckinResult<Vec<AttendanceCode>> {
        let Some(prefix) = Code::normalize(prefix) else {
            return Ok(Vec::new());
        };
        uow.repository::<AttendanceCode>()?
            .find(&AttendanceCodeFilter::Prefix {
                issue_date,
                prefix,
                limit,
            })
            .await
    }

    /// The open attendance of `person_id` at `occurrence_id`, if any
    pub async fn active_attendance_for<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        person_id: PersonId,
        occurrence_id: OccurrenceId,
    ) -> CheckinResult<Option<Attendance>> {
        uow.repository::<Attendance>()?
            .find_one(&AttendanceFilter::Open {
                occurrence_id,
                person_id,
            })
            .await
    }

    /// Everyone currently checked in to an occurrence
    pub async fn checked_in<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        occurrence_id: OccurrenceId,
    ) -> CheckinResult<Vec<Attendance>> {
        uow.repository::<Attendance>()?
            .find(&AttendanceFilter::OpenForOccurrence(occurrence_id))
            .await
    }

    /// A person's attendance, newest first
    pub async fn person_history<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        person_id: PersonId,
        limit: usize,
    ) -> CheckinResult<Vec<Attendance>> {
        uow.repository::<Attendance>()?
            .find(&AttendanceFilter::ForPerson { person_id, limit })
            .await
    }

    /// Check-ins across all occurrences started at or after `since`, newest first
    pub async fn recent_check_ins<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> CheckinResult<Vec<Attendance>> {
        uow.repository::<Attendance>()?
            .find(&AttendanceFilter::StartedSince { since, limit })
            .await
    }

    /// The code linked to an attendance
    pub async fn code_for<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        attendance: &Attendance,
    ) -> CheckinResult<Option<AttendanceCode>> {
        match attendance.attendance_code_id {
            Some(id) => uow.repository::<AttendanceCode>()?.get(id).await,
            None => Ok(None),
        }
    }
}
