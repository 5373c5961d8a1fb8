//! Verify Pickup Use Case
//!
//! A guardian presents the attendance code printed at check-in. Failed
//! verifications are counted per requesting subject (phone number, kiosk)
//! and the subject is refused once it reaches the configured limit.

use crate::application::attendance_codes::{AttendanceCodeIndex, CodeMatch};
use crate::application::config::CheckinConfig;
use crate::application::unit_of_work::UnitOfWork;
use crate::domain::entities::{Attendance, AttendanceCode};
use crate::domain::notification::{Notification, NotificationPort, notify_and_forget};
use crate::domain::repository::Store;
use crate::error::{CheckinError, CheckinResult};
use chrono::NaiveDate;
use platform::clock::{Clock, SystemClock};
use platform::rate_limit::{Admission, FailureCounterStore, FailureLimiter};
use std::sync::Arc;

/// Input DTO for pickup verification
#[derive(Debug, Clone)]
pub struct VerifyPickupInput {
    /// Who is asking; the rate limit key
    pub subject: String,
    pub issue_date: NaiveDate,
    /// Code as typed
    pub code: String,
}

/// Output of pickup verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickupOutcome {
    Verified {
        attendance: Attendance,
        code: AttendanceCode,
    },
    /// Unknown code, or the attendance is already closed. The failure has
    /// been recorded.
    Rejected { remaining_attempts: u32 },
}

/// Verify Pickup Use Case
pub struct VerifyPickupUseCase<S, R, N, C = SystemClock>
where
    S: Store,
    R: FailureCounterStore + Sync,
    N: NotificationPort + Sync,
    C: Clock,
{
    store: S,
    limiter: Arc<FailureLimiter<R, C>>,
    notifier: Arc<N>,
    config: Arc<CheckinConfig>,
    codes: AttendanceCodeIndex,
}

impl<S, R, N, C> VerifyPickupUseCase<S, R, N, C>
where
    S: Store,
    R: FailureCounterStore + Sync,
    N: NotificationPort + Sync,
    C: Clock,
{
    pub fn new(
        store: S,
        limiter: Arc<FailureLimiter<R, C>>,
        notifier: Arc<N>,
        config: Arc<CheckinConfig>,
    ) -> Self {
        Self {
            codes: AttendanceCodeIndex::new(config.code_length, config.code_max_issue_attempts),
            store,
            limiter,
            notifier,
            config,
        }
    }

    /// Verify a pickup code for `input.subject`
    ///
    /// A blocked subject is refused with `RateLimitExceeded` before the code
    /// is looked at, and the refused attempt is not counted.
    pub async fn execute(&self, input: VerifyPickupInput) -> CheckinResult<PickupOutcome> {
        if let Admission::Blocked { retry_after_ms } = self.limiter.check(&input.subject).await? {
            tracing::warn!(retry_after_ms = retry_after_ms, "Pickup verification refused");
            return Err(CheckinError::RateLimitExceeded { retry_after_ms });
        }

        let mut uow = UnitOfWork::new(self.store.clone());
        uow.begin().await?;
        let result = self
            .codes
            .lookup(&mut uow, input.issue_date, &input.code)
            .await;
        let found = uow.finish(result).await?;

        match found {
            Some(CodeMatch {
                code,
                attendance: Some(attendance),
            }) if attendance.is_open() => {
                self.limiter.record_success(&input.subject).await?;
                tracing::info!(
                    attendance_id = %attendance.id,
                    code_id = %code.id,
                    "Pickup verified"
                );
                Ok(PickupOutcome::Verified { attendance, code })
            }
            _ => {
                let record = self.limiter.record_failure(&input.subject).await?;
                tracing::info!(
                    issue_date = %input.issue_date,
                    failures = record.window.count,
                    "Pickup verification failed"
                );
                if record.tripped {
                    self.alert_security(&input, record.window.count).await;
                }
                Ok(PickupOutcome::Rejected {
                    remaining_attempts: record.remaining,
                })
            }
        }
    }

    async fn alert_security(&self, input: &VerifyPickupInput, failures: u32) {
        let retry_after_minutes = self.limiter.config().window.as_secs() / 60;
        let notification = Notification::new(
            "Pickup verification blocked",
            format!(
                "{failures} failed pickup attempts; further attempts refused for up to \
                 {retry_after_minutes} minutes"
            ),
        )
        .with_data(serde_json::json!({
            "issueDate": input.issue_date,
            "failures": failures,
        }));
        notify_and_forget(
            self.notifier.as_ref(),
            &self.config.security_recipient_group,
            &notification,
        )
        .await;
    }
}
