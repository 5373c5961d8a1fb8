//! Check-out Use Case

use crate::application::attendance_codes::AttendanceCodeIndex;
use crate::application::unit_of_work::UnitOfWork;
use crate::domain::entities::Attendance;
use crate::domain::repository::Store;
use crate::error::{CheckinError, CheckinResult};
use chrono::{DateTime, Utc};
use kernel::id::{OccurrenceId, PersonId};
use platform::clock::{Clock, SystemClock};

/// Check-out Use Case
pub struct CheckOutUseCase<S, C = SystemClock>
where
    S: Store,
    C: Clock,
{
    store: S,
    clock: C,
    codes: AttendanceCodeIndex,
}

impl<S, C> CheckOutUseCase<S, C>
where
    S: Store,
    C: Clock,
{
    pub fn new(store: S, clock: C, codes: AttendanceCodeIndex) -> Self {
        Self { store, clock, codes }
    }

    /// Close the person's open attendance at the occurrence now
    pub async fn execute(
        &self,
        occurrence_id: OccurrenceId,
        person_id: PersonId,
    ) -> CheckinResult<Attendance> {
        self.execute_at(occurrence_id, person_id, self.clock.now())
            .await
    }

    /// Close the open attendance with an explicit end time
    pub async fn execute_at(
        &self,
        occurrence_id: OccurrenceId,
        person_id: PersonId,
        ended_at: DateTime<Utc>,
    ) -> CheckinResult<Attendance> {
        let mut uow = UnitOfWork::new(self.store.clone());
        uow.begin().await?;

        let result = self
            .check_out(&mut uow, occurrence_id, person_id, ended_at)
            .await;
        let attendance = uow.finish(result).await?;

        tracing::info!(
            attendance_id = %attendance.id,
            occurrence_id = %occurrence_id,
            person_id = %person_id,
            "Checked out"
        );
        Ok(attendance)
    }

    async fn check_out(
        &self,
        uow: &mut UnitOfWork<S>,
        occurrence_id: OccurrenceId,
        person_id: PersonId,
        ended_at: DateTime<Utc>,
    ) -> CheckinResult<Attendance> {
        let mut attendance = self
            .codes
            .active_attendance_for(uow, person_id, occurrence_id)
            .await?
            .ok_or(CheckinError::NotCheckedIn {
                occurrence_id,
                person_id,
            })?;

        if !attendance.close(ended_at) {
            return Err(CheckinError::InvalidCheckout {
                started_at: attendance.start_at,
                ended_at,
            });
        }

        uow.repository::<Attendance>()?.update(&attendance).await?;
        Ok(attendance)
    }
}
