//! Occurrence Resolver
//!
//! Get-or-create for the single occurrence of a (group, date, schedule).
//!
//! The read is an optimization only. The unique constraint on the key decides
//! the winner: a losing insert comes back as [`AddOutcome::Conflict`] and the
//! loser re-reads the winner's row. No in-process lock is taken.

use crate::application::unit_of_work::UnitOfWork;
use crate::domain::entities::Occurrence;
use crate::domain::repository::{AddOutcome, OccurrenceFilter, Store};
use crate::domain::value_objects::OccurrenceKey;
use crate::error::{CheckinError, CheckinResult};
use chrono::{DateTime, Utc};
use kernel::id::{LocationId, OccurrenceId};

/// How the occurrence was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This call inserted the row
    Created(Occurrence),
    /// The row already existed, or a concurrent caller won the insert
    Found(Occurrence),
}

impl Resolution {
    pub fn occurrence(&self) -> &Occurrence {
        match self {
            Resolution::Created(o) | Resolution::Found(o) => o,
        }
    }

    pub fn into_occurrence(self) -> Occurrence {
        match self {
            Resolution::Created(o) | Resolution::Found(o) => o,
        }
    }

    pub fn id(&self) -> OccurrenceId {
        self.occurrence().id
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Resolution::Created(_))
    }
}

/// Occurrence Resolver
#[derive(Debug, Clone, Copy)]
pub struct OccurrenceResolver {
    max_attempts: u32,
}

impl OccurrenceResolver {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Resolve the occurrence for `key` inside the caller's transaction,
    /// creating it if absent.
    ///
    /// `location_id` is only used when this call creates the row.
    pub async fn get_or_create<S: Store>(
        &self,
        uow: &mut UnitOfWork<S>,
        key: OccurrenceKey,
        location_id: Option<LocationId>,
        now: DateTime<Utc>,
    ) -> CheckinResult<Resolution> {
        let filter = OccurrenceFilter::Key(key);
        let mut conflicts = 0;

        for attempt in 1..=self.max_attempts {
            let mut occurrences = uow.repository::<Occurrence>()?;

            if let Some(existing) = occurrences.find_one(&filter).await? {
                if conflicts > 0 {
                    tracing::debug!(
                        occurrence_id = %existing.id,
                        key = %key,
                        attempt = attempt,
                        "Occurrence created concurrently, using winner"
                    );
                }
                return Ok(Resolution::Found(existing));
            }

            let candidate = Occurrence::new(key, location_id, now);
            match occurrences.add(&candidate).await? {
                AddOutcome::Added => {
                    tracing::info!(
                        occurrence_id = %candidate.id,
                        key = %key,
                        "Occurrence created"
                    );
                    return Ok(Resolution::Created(candidate));
                }
                AddOutcome::Conflict => {
                    conflicts += 1;
                    tracing::debug!(key = %key, attempt = attempt, "Occurrence insert conflicted");
                }
            }
        }

        let err = CheckinError::SchemaInvariantViolation { key, conflicts };
        err.log();
        Err(err)
    }
}

impl Default for OccurrenceResolver {
    fn default() -> Self {
        Self::new(3)
    }
}
