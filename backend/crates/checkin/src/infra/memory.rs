//! In-memory Store
//!
//! Transactional store with the PostgreSQL behaviour the check-in core
//! relies on:
//! - each transaction reads committed rows plus its own pending writes
//! - an insert whose unique key is held by another transaction's
//!   uncommitted row waits until that transaction finishes, then conflicts
//!   (winner committed) or proceeds (winner rolled back)
//! - an update of a row with another transaction's pending write waits the
//!   same way
//! - at most one open attendance per (occurrence, person)
//! - dropping an unfinished transaction rolls it back
//!
//! Used by tests and single-process deployments.

use crate::domain::entities::{Attendance, AttendanceCode, Occurrence};
use crate::domain::repository::{
    AddOutcome, AttendanceCodeFilter, AttendanceFilter, Entity, MutableRepository,
    OccurrenceFilter, Repository, Store, StoreTransaction,
};
use crate::domain::value_objects::{Code, OccurrenceKey};
use crate::error::{CheckinError, CheckinResult};
use chrono::NaiveDate;
use kernel::id::{AttendanceCodeId, AttendanceId, OccurrenceId, PersonId};
use std::collections::HashMap;
use std::hash::Hash;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
#[cfg(test)]
use std::sync::atomic::AtomicBool;

/// Longest a writer waits on another transaction's pending row
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

type TxId = u64;

#[derive(Debug, Clone)]
struct Pending<E> {
    tx: TxId,
    value: E,
}

#[derive(Debug, Clone)]
struct Row<E> {
    committed: Option<E>,
    pending: Option<Pending<E>>,
}

impl<E> Row<E> {
    fn visible(&self, tx: TxId) -> Option<&E> {
        match &self.pending {
            Some(p) if p.tx == tx => Some(&p.value),
            _ => self.committed.as_ref(),
        }
    }

    fn pending_tx(&self) -> Option<TxId> {
        self.pending.as_ref().map(|p| p.tx)
    }
}

enum InsertAttempt {
    Done(AddOutcome),
    Blocked,
}

struct Table<E: MemoryEntity> {
    rows: HashMap<E::Id, Row<E>>,
    unique: HashMap<E::Key, E::Id>,
}

impl<E: MemoryEntity> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            unique: HashMap::new(),
        }
    }
}

impl<E: MemoryEntity> Table<E> {
    fn try_insert(&mut self, tx: TxId, entity: &E) -> InsertAttempt {
        let id = entity.id();
        if let Some(row) = self.rows.get(&id) {
            return match row.pending_tx() {
                Some(owner) if owner != tx && row.committed.is_none() => InsertAttempt::Blocked,
                _ => InsertAttempt::Done(AddOutcome::Conflict),
            };
        }

        let key = entity.unique_key();
        if let Some(key) = &key
            && let Some(row) = self.unique.get(key).and_then(|holder| self.rows.get(holder))
        {
            if row.pending_tx().is_some_and(|owner| owner != tx) {
                return InsertAttempt::Blocked;
            }
            // The holder may have left the key since, e.g. a closed attendance
            if row.visible(tx).and_then(E::unique_key).as_ref() == Some(key) {
                return InsertAttempt::Done(AddOutcome::Conflict);
            }
        }

        if let Some(key) = key {
            self.unique.insert(key, id);
        }
        self.rows.insert(
            id,
            Row {
                committed: None,
                pending: Some(Pending {
                    tx,
                    value: entity.clone(),
                }),
            },
        );
        InsertAttempt::Done(AddOutcome::Added)
    }

    /// `None` while another transaction holds the row
    fn try_update(&mut self, tx: TxId, entity: &E) -> Option<CheckinResult<()>> {
        let id = entity.id();
        let Some(row) = self.rows.get_mut(&id) else {
            return Some(Err(missing::<E>(id)));
        };
        match row.pending_tx() {
            Some(owner) if owner != tx => None,
            _ => {
                row.pending = Some(Pending {
                    tx,
                    value: entity.clone(),
                });
                Some(Ok(()))
            }
        }
    }

    fn get(&self, tx: TxId, id: E::Id) -> Option<E> {
        self.rows.get(&id).and_then(|row| row.visible(tx)).cloned()
    }

    fn find(&self, tx: TxId, filter: &E::Filter) -> Vec<E> {
        let mut found: Vec<E> = self
            .rows
            .values()
            .filter_map(|row| row.visible(tx))
            .filter(|e| e.matches(filter))
            .cloned()
            .collect();
        E::sort(&mut found);
        if let Some(limit) = E::limit(filter) {
            found.truncate(limit);
        }
        found
    }

    /// Promote (commit) or discard (rollback) the pending writes of `tx`
    fn release(&mut self, tx: TxId, commit: bool) {
        let mut abandoned = Vec::new();
        for (id, row) in self.rows.iter_mut() {
            let Some(pending) = row.pending.take_if(|p| p.tx == tx) else {
                continue;
            };
            if commit {
                row.committed = Some(pending.value);
            } else if row.committed.is_none() {
                abandoned.push((*id, pending.value.unique_key()));
            }
        }
        for (id, key) in abandoned {
            self.rows.remove(&id);
            if let Some(key) = key
                && self.unique.get(&key) == Some(&id)
            {
                self.unique.remove(&key);
                // A committed row may still hold the key it had handed over
                let holder = self
                    .rows
                    .iter()
                    .find(|(_, row)| {
                        row.committed.as_ref().and_then(E::unique_key).as_ref() == Some(&key)
                    })
                    .map(|(id, _)| *id);
                if let Some(holder) = holder {
                    self.unique.insert(key, holder);
                }
            }
        }
    }

    fn committed_len(&self) -> usize {
        self.rows.values().filter(|r| r.committed.is_some()).count()
    }
}

fn missing<E: Entity>(id: E::Id) -> CheckinError {
    CheckinError::Internal(format!("{} row {} not found", E::KIND, id))
}

/// How an entity is laid out in the in-memory tables
trait MemoryEntity: Entity {
    /// Unique constraint besides the primary key
    type Key: Eq + Hash + Send + Sync + 'static;

    fn unique_key(&self) -> Option<Self::Key>;

    fn table(tables: &mut Tables) -> &mut Table<Self>;

    /// Result order of `find`
    fn sort(rows: &mut [Self]);

    fn limit(filter: &Self::Filter) -> Option<usize>;
}

impl MemoryEntity for Occurrence {
    type Key = OccurrenceKey;

    fn unique_key(&self) -> Option<OccurrenceKey> {
        Some(self.key())
    }

    fn table(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.occurrences
    }

    fn sort(rows: &mut [Self]) {
        rows.sort_by_key(|o| (o.created_at, o.id));
    }

    fn limit(_filter: &OccurrenceFilter) -> Option<usize> {
        None
    }
}

impl MemoryEntity for Attendance {
    type Key = (OccurrenceId, PersonId);

    fn unique_key(&self) -> Option<(OccurrenceId, PersonId)> {
        self.is_open().then_some((self.occurrence_id, self.person_id))
    }

    fn table(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.attendances
    }

    fn sort(rows: &mut [Self]) {
        rows.sort_by(|a, b| b.start_at.cmp(&a.start_at).then(a.id.cmp(&b.id)));
    }

    fn limit(filter: &AttendanceFilter) -> Option<usize> {
        filter.limit()
    }
}

impl MemoryEntity for AttendanceCode {
    type Key = (NaiveDate, Code);

    fn unique_key(&self) -> Option<(NaiveDate, Code)> {
        Some((self.issue_date, self.code.clone()))
    }

    fn table(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.codes
    }

    fn sort(rows: &mut [Self]) {
        rows.sort_by(|a, b| a.code.as_str().cmp(b.code.as_str()));
    }

    fn limit(filter: &AttendanceCodeFilter) -> Option<usize> {
        filter.limit()
    }
}

#[derive(Default)]
struct Tables {
    occurrences: Table<Occurrence>,
    attendances: Table<Attendance>,
    codes: Table<AttendanceCode>,
}

impl Tables {
    fn release(&mut self, tx: TxId, commit: bool) {
        self.occurrences.release(tx, commit);
        self.attendances.release(tx, commit);
        self.codes.release(tx, commit);
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    /// Signalled whenever a transaction commits or rolls back
    released: Notify,
    next_tx: AtomicU64,
    #[cfg(test)]
    fail_next_commit: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.fail_next_commit.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

/// Committed row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub occurrences: usize,
    pub attendances: usize,
    pub attendance_codes: usize,
}

/// In-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed row counts per table
    pub fn counts(&self) -> StoreCounts {
        let tables = self.shared.lock();
        StoreCounts {
            occurrences: tables.occurrences.committed_len(),
            attendances: tables.attendances.committed_len(),
            attendance_codes: tables.codes.committed_len(),
        }
    }

    /// Delete committed codes issued before `date` and unlink them from
    /// their attendance rows. Rows with pending writes are skipped.
    pub fn purge_codes_before(&self, date: NaiveDate) -> u64 {
        let mut guard = self.shared.lock();
        let tables = &mut *guard;

        let expired: Vec<(AttendanceCodeId, (NaiveDate, Code))> = tables
            .codes
            .rows
            .iter()
            .filter(|(_, row)| row.pending.is_none())
            .filter_map(|(id, row)| row.committed.as_ref().map(|c| (*id, c)))
            .filter(|(_, c)| c.issue_date < date)
            .map(|(id, c)| (id, (c.issue_date, c.code.clone())))
            .collect();

        for (id, key) in &expired {
            tables.codes.rows.remove(id);
            tables.codes.unique.remove(key);
        }

        for row in tables.attendances.rows.values_mut() {
            if row.pending.is_some() {
                continue;
            }
            if let Some(attendance) = row.committed.as_mut()
                && let Some(code_id) = attendance.attendance_code_id
                && expired.iter().any(|(id, _)| *id == code_id)
            {
                attendance.attendance_code_id = None;
            }
        }

        expired.len() as u64
    }

    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> CheckinResult<MemoryTransaction> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
            finished: false,
        })
    }
}

/// Transaction on a [`MemoryStore`]
pub struct MemoryTransaction {
    id: TxId,
    shared: Arc<Shared>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> CheckinResult<()> {
        if self.finished {
            return Err(CheckinError::NoTransactionInProgress);
        }
        Ok(())
    }

    fn get_row<E: MemoryEntity>(&self, id: E::Id) -> CheckinResult<Option<E>> {
        self.ensure_open()?;
        let mut tables = self.shared.lock();
        Ok(E::table(&mut *tables).get(self.id, id))
    }

    fn find_rows<E: MemoryEntity>(&self, filter: &E::Filter) -> CheckinResult<Vec<E>> {
        self.ensure_open()?;
        let mut tables = self.shared.lock();
        Ok(E::table(&mut *tables).find(self.id, filter))
    }

    async fn insert_row<E: MemoryEntity>(&self, entity: &E) -> CheckinResult<AddOutcome> {
        self.ensure_open()?;
        let tx = self.id;
        self.wait_for(|tables| match E::table(tables).try_insert(tx, entity) {
            InsertAttempt::Done(outcome) => Some(outcome),
            InsertAttempt::Blocked => None,
        })
        .await
    }

    async fn update_row<E: MemoryEntity>(&self, entity: &E) -> CheckinResult<()> {
        self.ensure_open()?;
        let tx = self.id;
        self.wait_for(|tables| E::table(tables).try_update(tx, entity))
            .await?
    }

    /// Retry `op` until it stops reporting a blocked row
    async fn wait_for<T, F>(&self, mut op: F) -> CheckinResult<T>
    where
        F: FnMut(&mut Tables) -> Option<T>,
    {
        let deadline = tokio::time::Instant::now() + LOCK_WAIT_TIMEOUT;
        loop {
            let mut released = pin!(self.shared.released.notified());
            released.as_mut().enable();

            let done = {
                let mut tables = self.shared.lock();
                op(&mut *tables)
            };
            if let Some(done) = done {
                return Ok(done);
            }

            tracing::trace!(tx = self.id, "Waiting on a concurrent transaction");
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(CheckinError::Internal(format!(
                    "transaction {} timed out waiting for a row lock",
                    self.id
                )));
            }
        }
    }

    fn release(&mut self, commit: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.lock().release(self.id, commit);
        self.shared.released.notify_waiters();
    }
}

impl StoreTransaction for MemoryTransaction {
    async fn commit(&mut self) -> CheckinResult<()> {
        self.ensure_open()?;
        if self.shared.take_injected_failure() {
            return Err(CheckinError::Internal("injected commit failure".into()));
        }
        self.release(true);
        Ok(())
    }

    async fn rollback(&mut self) -> CheckinResult<()> {
        self.release(false);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release(false);
    }
}

impl Repository<Occurrence> for MemoryTransaction {
    async fn get(&mut self, id: OccurrenceId) -> CheckinResult<Option<Occurrence>> {
        self.get_row(id)
    }

    async fn add(&mut self, entity: &Occurrence) -> CheckinResult<AddOutcome> {
        self.insert_row(entity).await
    }

    async fn find(&mut self, filter: &OccurrenceFilter) -> CheckinResult<Vec<Occurrence>> {
        self.find_rows(filter)
    }
}

impl Repository<Attendance> for MemoryTransaction {
    async fn get(&mut self, id: AttendanceId) -> CheckinResult<Option<Attendance>> {
        self.get_row(id)
    }

    async fn add(&mut self, entity: &Attendance) -> CheckinResult<AddOutcome> {
        self.insert_row(entity).await
    }

    async fn find(&mut self, filter: &AttendanceFilter) -> CheckinResult<Vec<Attendance>> {
        self.find_rows(filter)
    }
}

impl MutableRepository<Attendance> for MemoryTransaction {
    async fn update(&mut self, entity: &Attendance) -> CheckinResult<()> {
        self.update_row(entity).await
    }
}

impl Repository<AttendanceCode> for MemoryTransaction {
    async fn get(&mut self, id: AttendanceCodeId) -> CheckinResult<Option<AttendanceCode>> {
        self.get_row(id)
    }

    async fn add(&mut self, entity: &AttendanceCode) -> CheckinResult<AddOutcome> {
        self.insert_row(entity).await
    }

    async fn find(&mut self, filter: &AttendanceCodeFilter) -> CheckinResult<Vec<AttendanceCode>> {
        self.find_rows(filter)
    }
}

impl MutableRepository<AttendanceCode> for MemoryTransaction {
    async fn update(&mut self, entity: &AttendanceCode) -> CheckinResult<()> {
        self.update_row(entity).await
    }
}
