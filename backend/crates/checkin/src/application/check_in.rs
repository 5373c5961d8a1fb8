//! Check-in Use Case

use crate::application::attendance_codes::AttendanceCodeIndex;
use crate::application::config::CheckinConfig;
use crate::application::resolve_occurrence::{OccurrenceResolver, Resolution};
use crate::application::unit_of_work::UnitOfWork;
use crate::domain::entities::{Attendance, AttendanceCode};
use crate::domain::notification::{Notification, NotificationPort, notify_and_forget};
use crate::domain::repository::{AddOutcome, Store};
use crate::domain::value_objects::OccurrenceKey;
use crate::error::{CheckinError, CheckinResult};
use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{GroupId, LocationId, OccurrenceId, PersonId, ScheduleId};
use platform::clock::{Clock, SystemClock};
use std::sync::Arc;

/// Input DTO for check-in
#[derive(Debug, Clone)]
pub struct CheckInInput {
    pub group_id: GroupId,
    pub occurrence_date: NaiveDate,
    pub schedule_id: ScheduleId,
    pub location_id: Option<LocationId>,
    pub person_id: PersonId,
}

impl CheckInInput {
    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey::new(self.group_id, self.occurrence_date, self.schedule_id)
    }
}

/// Output of check-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    CheckedIn {
        occurrence: Resolution,
        attendance: Attendance,
        code: AttendanceCode,
    },
    /// The person already has an open attendance at this occurrence
    AlreadyCheckedIn {
        attendance: Attendance,
        code: Option<AttendanceCode>,
    },
}

impl CheckInOutcome {
    pub fn attendance(&self) -> &Attendance {
        match self {
            CheckInOutcome::CheckedIn { attendance, .. }
            | CheckInOutcome::AlreadyCheckedIn { attendance, .. } => attendance,
        }
    }

    pub fn code(&self) -> Option<&AttendanceCode> {
        match self {
            CheckInOutcome::CheckedIn { code, .. } => Some(code),
            CheckInOutcome::AlreadyCheckedIn { code, .. } => code.as_ref(),
        }
    }
}

enum OpenAttendance {
    Opened(Attendance),
    Existing {
        attendance: Attendance,
        code: Option<AttendanceCode>,
    },
}

/// Check-in Use Case
pub struct CheckInUseCase<S, N, C = SystemClock>
where
    S: Store,
    N: NotificationPort + Sync,
    C: Clock,
{
    store: S,
    notifier: Arc<N>,
    clock: C,
    config: Arc<CheckinConfig>,
    resolver: OccurrenceResolver,
    codes: AttendanceCodeIndex,
}

impl<S, N, C> CheckInUseCase<S, N, C>
where
    S: Store,
    N: NotificationPort + Sync,
    C: Clock,
{
    pub fn new(store: S, notifier: Arc<N>, clock: C, config: Arc<CheckinConfig>) -> Self {
        Self {
            resolver: OccurrenceResolver::new(config.resolver_max_attempts),
            codes: AttendanceCodeIndex::new(config.code_length, config.code_max_issue_attempts),
            store,
            notifier,
            clock,
            config,
        }
    }

    /// Check a person in, resolving the occurrence on the way
    ///
    /// Occurrence, attendance and code are written in one transaction. The
    /// notification goes out only after commit.
    pub async fn execute(&self, input: CheckInInput) -> CheckinResult<CheckInOutcome> {
        let now = self.clock.now();
        let mut uow = UnitOfWork::new(self.store.clone());
        uow.begin().await?;

        let result = self.check_in(&mut uow, &input, now).await;
        let outcome = uow.finish(result).await?;

        if let CheckInOutcome::CheckedIn {
            occurrence,
            attendance,
            code,
        } = &outcome
        {
            tracing::info!(
                occurrence_id = %occurrence.id(),
                attendance_id = %attendance.id,
                person_id = %attendance.person_id,
                occurrence_created = occurrence.was_created(),
                "Checked in"
            );
            if self.config.notify_on_check_in {
                let notification = Notification::new(
                    "Check-in",
                    format!("Checked in with code {}", code.code),
                )
                .with_data(serde_json::json!({
                    "occurrenceId": occurrence.id(),
                    "attendanceId": attendance.id,
                    "personId": attendance.person_id,
                    "code": code.code,
                }));
                notify_and_forget(
                    self.notifier.as_ref(),
                    &input.group_id.to_string(),
                    &notification,
                )
                .await;
            }
        }

        Ok(outcome)
    }

    async fn check_in(
        &self,
        uow: &mut UnitOfWork<S>,
        input: &CheckInInput,
        now: DateTime<Utc>,
    ) -> CheckinResult<CheckInOutcome> {
        let occurrence = self
            .resolver
            .get_or_create(uow, input.key(), input.location_id, now)
            .await?;

        let mut attendance = match self.open_attendance(uow, input, occurrence.id(), now).await? {
            OpenAttendance::Opened(attendance) => attendance,
            OpenAttendance::Existing { attendance, code } => {
                return Ok(CheckInOutcome::AlreadyCheckedIn { attendance, code });
            }
        };

        let code = self
            .codes
            .issue_code(uow, input.occurrence_date, Some(attendance.id), now)
            .await?;

        attendance.attendance_code_id = Some(code.id);
        uow.repository::<Attendance>()?.update(&attendance).await?;

        Ok(CheckInOutcome::CheckedIn {
            occurrence,
            attendance,
            code,
        })
    }

    /// Insert an open attendance, or report the one that already exists.
    ///
    /// A concurrent check-in of the same person makes the insert conflict on
    /// the open-attendance constraint; the winner's row is read back instead.
    async fn open_attendance(
        &self,
        uow: &mut UnitOfWork<S>,
        input: &CheckInInput,
        occurrence_id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> CheckinResult<OpenAttendance> {
        let max_attempts = self.config.resolver_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if let Some(attendance) = self
                .codes
                .active_attendance_for(uow, input.person_id, occurrence_id)
                .await?
            {
                tracing::debug!(
                    attendance_id = %attendance.id,
                    person_id = %input.person_id,
                    "Already checked in"
                );
                let code = self.codes.code_for(uow, &attendance).await?;
                return Ok(OpenAttendance::Existing { attendance, code });
            }

            let attendance = Attendance::new(occurrence_id, input.person_id, now);
            match uow.repository::<Attendance>()?.add(&attendance).await? {
                AddOutcome::Added => return Ok(OpenAttendance::Opened(attendance)),
                AddOutcome::Conflict => {
                    tracing::debug!(
                        person_id = %input.person_id,
                        occurrence_id = %occurrence_id,
                        attempt = attempt,
                        "Open attendance conflict, re-reading"
                    );
                }
            }
        }

        tracing::error!(
            person_id = %input.person_id,
            occurrence_id = %occurrence_id,
            attempts = max_attempts,
            "Open attendance conflicts but cannot be read"
        );
        Err(CheckinError::Internal(format!(
            "open attendance of person {} at occurrence {} conflicts but is not visible",
            input.person_id, occurrence_id
        )))
    }
}
