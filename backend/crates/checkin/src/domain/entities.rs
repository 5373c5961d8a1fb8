//! Domain Entities
//!
//! Core records of the check-in domain.

use crate::domain::value_objects::{Code, OccurrenceKey};
use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{
    AttendanceCodeId, AttendanceId, GroupId, LocationId, OccurrenceId, PersonId, ScheduleId,
};
use serde::{Deserialize, Serialize};

/// Occurrence entity - one dated meeting of a recurring group
///
/// Identity fields never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub group_id: GroupId,
    pub occurrence_date: NaiveDate,
    pub schedule_id: ScheduleId,
    pub location_id: Option<LocationId>,
    pub created_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn new(key: OccurrenceKey, location_id: Option<LocationId>, now: DateTime<Utc>) -> Self {
        Self {
            id: OccurrenceId::new(),
            group_id: key.group_id,
            occurrence_date: key.occurrence_date,
            schedule_id: key.schedule_id,
            location_id,
            created_at: now,
        }
    }

    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey::new(self.group_id, self.occurrence_date, self.schedule_id)
    }
}

/// Attendance entity - one person's check-in to one occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub occurrence_id: OccurrenceId,
    pub person_id: PersonId,
    pub start_at: DateTime<Utc>,
    /// `None` while the person is still checked in
    pub end_at: Option<DateTime<Utc>>,
    pub attendance_code_id: Option<AttendanceCodeId>,
}

impl Attendance {
    pub fn new(occurrence_id: OccurrenceId, person_id: PersonId, start_at: DateTime<Utc>) -> Self {
        Self {
            id: AttendanceId::new(),
            occurrence_id,
            person_id,
            start_at,
            end_at: None,
            attendance_code_id: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }

    /// Close the attendance. Returns `false` (and changes nothing) if it is
    /// already closed or `at` precedes the check-in.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_open() || at < self.start_at {
            return false;
        }
        self.end_at = Some(at);
        true
    }
}

/// AttendanceCode entity - short code valid on its issue date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceCode {
    pub id: AttendanceCodeId,
    pub issue_date: NaiveDate,
    pub code: Code,
    pub attendance_id: Option<AttendanceId>,
    pub created_at: DateTime<Utc>,
}

impl AttendanceCode {
    pub fn new(
        issue_date: NaiveDate,
        code: Code,
        attendance_id: Option<AttendanceId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttendanceCodeId::new(),
            issue_date,
            code,
            attendance_id,
            created_at: now,
        }
    }
}
