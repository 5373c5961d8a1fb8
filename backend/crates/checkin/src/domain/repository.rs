//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the infra layer.
//!
//! Every repository call runs inside a store transaction. A backend exposes
//! one transaction type that implements [`Repository`] once per entity kind,
//! so callers address all record types through the same three operations.
//! The async methods are written in their `Send` form by hand because the
//! traits are generic or carry associated types.

use crate::domain::entities::{Attendance, AttendanceCode, Occurrence};
use crate::domain::value_objects::{Code, OccurrenceKey};
use crate::error::CheckinResult;
use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{AttendanceCodeId, AttendanceId, OccurrenceId, PersonId};
use std::fmt;
use std::future::Future;
use std::hash::Hash;

/// Record kinds managed by the check-in core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Occurrence,
    Attendance,
    AttendanceCode,
}

impl EntityKind {
    pub const COUNT: usize = 3;

    pub const fn index(self) -> usize {
        match self {
            EntityKind::Occurrence => 0,
            EntityKind::Attendance => 1,
            EntityKind::AttendanceCode => 2,
        }
    }

    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Occurrence => "occurrences",
            EntityKind::Attendance => "attendances",
            EntityKind::AttendanceCode => "attendance_codes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A persisted record type
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    type Id: Copy + Eq + Hash + fmt::Display + Send + Sync + 'static;
    /// Typed predicate for `find`
    type Filter: fmt::Debug + Send + Sync;

    fn id(&self) -> Self::Id;

    /// Evaluate the filter predicate in process
    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// Result of an insert
///
/// A unique-constraint rejection is an expected outcome under concurrency,
/// so it is a value here rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Conflict,
}

/// Generic transaction-scoped repository
pub trait Repository<E: Entity>: Send {
    fn get(&mut self, id: E::Id) -> impl Future<Output = CheckinResult<Option<E>>> + Send;

    fn add(&mut self, entity: &E) -> impl Future<Output = CheckinResult<AddOutcome>> + Send;

    fn find(&mut self, filter: &E::Filter)
    -> impl Future<Output = CheckinResult<Vec<E>>> + Send;
}

/// Repository for kinds that may change after insert
///
/// Occurrences are deliberately not mutable.
pub trait MutableRepository<E: Entity>: Repository<E> {
    fn update(&mut self, entity: &E) -> impl Future<Output = CheckinResult<()>> + Send;
}

/// Store transaction
///
/// Dropping a transaction that was neither committed nor rolled back must
/// roll it back.
#[trait_variant::make(StoreTransaction: Send)]
pub trait LocalStoreTransaction {
    async fn commit(&mut self) -> CheckinResult<()>;

    async fn rollback(&mut self) -> CheckinResult<()>;
}

/// Backing store that hands out transactions
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTransaction
        + Repository<Occurrence>
        + MutableRepository<Attendance>
        + MutableRepository<AttendanceCode>
        + 'static;

    fn begin(&self) -> impl Future<Output = CheckinResult<Self::Tx>> + Send;
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccurrenceFilter {
    /// The unique (group, date, schedule) lookup
    Key(OccurrenceKey),
}

/// Attendance predicates. Results are ordered newest `start_at` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceFilter {
    /// Open attendance of one person at one occurrence
    Open {
        occurrence_id: OccurrenceId,
        person_id: PersonId,
    },
    /// Everyone currently checked in to an occurrence
    OpenForOccurrence(OccurrenceId),
    /// A person's history
    ForPerson { person_id: PersonId, limit: usize },
    /// Recent activity across all occurrences
    StartedSince {
        since: DateTime<Utc>,
        limit: usize,
    },
}

impl AttendanceFilter {
    pub fn limit(&self) -> Option<usize> {
        match self {
            AttendanceFilter::ForPerson { limit, .. }
            | AttendanceFilter::StartedSince { limit, .. } => Some(*limit),
            _ => None,
        }
    }
}

/// Attendance code predicates, always scoped to one issue date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceCodeFilter {
    Exact { issue_date: NaiveDate, code: Code },
    Prefix {
        issue_date: NaiveDate,
        prefix: Code,
        limit: usize,
    },
}

impl AttendanceCodeFilter {
    pub fn limit(&self) -> Option<usize> {
        match self {
            AttendanceCodeFilter::Prefix { limit, .. } => Some(*limit),
            AttendanceCodeFilter::Exact { .. } => None,
        }
    }
}

impl Entity for Occurrence {
    const KIND: EntityKind = EntityKind::Occurrence;
    type Id = OccurrenceId;
    type Filter = OccurrenceFilter;

    fn id(&self) -> OccurrenceId {
        self.id
    }

    fn matches(&self, filter: &OccurrenceFilter) -> bool {
        match filter {
            OccurrenceFilter::Key(key) => self.key() == *key,
        }
    }
}

impl Entity for Attendance {
    const KIND: EntityKind = EntityKind::Attendance;
    type Id = AttendanceId;
    type Filter = AttendanceFilter;

    fn id(&self) -> AttendanceId {
        self.id
    }

    fn matches(&self, filter: &AttendanceFilter) -> bool {
        match filter {
            AttendanceFilter::Open {
                occurrence_id,
                person_id,
            } => {
                self.is_open()
                    && self.occurrence_id == *occurrence_id
                    && self.person_id == *person_id
            }
            AttendanceFilter::OpenForOccurrence(occurrence_id) => {
                self.is_open() && self.occurrence_id == *occurrence_id
            }
            AttendanceFilter::ForPerson { person_id, .. } => self.person_id == *person_id,
            AttendanceFilter::StartedSince { since, .. } => self.start_at >= *since,
        }
    }
}

impl Entity for AttendanceCode {
    const KIND: EntityKind = EntityKind::AttendanceCode;
    type Id = AttendanceCodeId;
    type Filter = AttendanceCodeFilter;

    fn id(&self) -> AttendanceCodeId {
        self.id
    }

    fn matches(&self, filter: &AttendanceCodeFilter) -> bool {
        match filter {
            AttendanceCodeFilter::Exact { issue_date, code } => {
                self.issue_date == *issue_date && self.code == *code
            }
            AttendanceCodeFilter::Prefix {
                issue_date, prefix, ..
            } => self.issue_date == *issue_date && self.code.as_str().starts_with(prefix.as_str()),
        }
    }
}
