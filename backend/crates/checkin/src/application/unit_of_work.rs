//! Unit of Work
//!
//! Scoped transaction over a [`Store`]. One unit of work holds at most one
//! open transaction. Per-kind repository accessors live in a small registry
//! indexed by [`EntityKind`] and are kept for the lifetime of the unit of
//! work, across transactions.
//!
//! Release is guaranteed on every exit path: `commit` takes the transaction
//! out before finalizing it, a failed commit rolls back before returning the
//! error, and dropping the unit of work (including a cancelled future that
//! owns it) drops the transaction, which rolls it back.

use crate::domain::repository::{
    AddOutcome, Entity, EntityKind, MutableRepository, Repository, Store, StoreTransaction,
};
use crate::error::{CheckinError, CheckinResult};
use std::marker::PhantomData;

/// Per-kind accessor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryAccessor {
    kind: EntityKind,
    reads: u64,
    writes: u64,
    conflicts: u64,
}

impl RepositoryAccessor {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            reads: 0,
            writes: 0,
            conflicts: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }
}

/// Accessors keyed by entity kind, constructed on first use
#[derive(Debug, Default)]
struct RepositoryRegistry {
    slots: [Option<RepositoryAccessor>; EntityKind::COUNT],
    constructed: usize,
}

impl RepositoryRegistry {
    fn accessor(&mut self, kind: EntityKind) -> &mut RepositoryAccessor {
        let slot = &mut self.slots[kind.index()];
        if slot.is_none() {
            self.constructed += 1;
            tracing::trace!(kind = %kind, "Repository accessor constructed");
        }
        slot.get_or_insert_with(|| RepositoryAccessor::new(kind))
    }

    fn get(&self, kind: EntityKind) -> Option<&RepositoryAccessor> {
        self.slots[kind.index()].as_ref()
    }

    fn log_activity(&self) {
        for accessor in self.slots.iter().flatten() {
            tracing::debug!(
                kind = %accessor.kind,
                reads = accessor.reads,
                writes = accessor.writes,
                conflicts = accessor.conflicts,
                "Repository activity"
            );
        }
    }
}

/// Transaction coordinator
pub struct UnitOfWork<S: Store> {
    store: S,
    tx: Option<S::Tx>,
    registry: RepositoryRegistry,
}

impl<S: Store> UnitOfWork<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            tx: None,
            registry: RepositoryRegistry::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Open a transaction
    pub async fn begin(&mut self) -> CheckinResult<()> {
        if self.tx.is_some() {
            return Err(CheckinError::AlreadyInProgress);
        }
        self.tx = Some(self.store.begin().await?);
        tracing::trace!("Unit of work started");
        Ok(())
    }

    /// Repository for entity kind `E`, bound to the open transaction
    pub fn repository<E>(&mut self) -> CheckinResult<Repo<'_, E, S::Tx>>
    where
        E: Entity,
        S::Tx: Repository<E>,
    {
        let tx = self
            .tx
            .as_mut()
            .ok_or(CheckinError::NoTransactionInProgress)?;
        let accessor = self.registry.accessor(E::KIND);
        Ok(Repo {
            tx,
            accessor,
            _entity: PhantomData,
        })
    }

    /// Commit the open transaction. On failure the transaction is rolled
    /// back and the commit error returned.
    pub async fn commit(&mut self) -> CheckinResult<()> {
        let mut tx = self.tx.take().ok_or(CheckinError::NoTransactionInProgress)?;

        match tx.commit().await {
            Ok(()) => {
                self.registry.log_activity();
                tracing::trace!("Unit of work committed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Commit failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback after failed commit failed");
                }
                Err(e)
            }
        }
    }

    pub async fn rollback(&mut self) -> CheckinResult<()> {
        let mut tx = self.tx.take().ok_or(CheckinError::NoTransactionInProgress)?;
        tx.rollback().await?;
        tracing::trace!("Unit of work rolled back");
        Ok(())
    }

    /// Commit if `result` is `Ok`, otherwise roll back and return the
    /// original error
    pub async fn finish<T>(&mut self, result: CheckinResult<T>) -> CheckinResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if self.tx.is_some()
                    && let Err(rollback_err) = self.rollback().await
                {
                    tracing::error!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Accessor state for `kind`, if it has been constructed
    pub fn accessor(&self, kind: EntityKind) -> Option<&RepositoryAccessor> {
        self.registry.get(kind)
    }

    /// Number of accessors constructed so far
    pub fn constructed_accessors(&self) -> usize {
        self.registry.constructed
    }
}

impl<S: Store> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            tracing::warn!("Unit of work dropped with an open transaction, rolled back");
        }
    }
}

/// Repository handle for one entity kind
pub struct Repo<'a, E, T> {
    tx: &'a mut T,
    accessor: &'a mut RepositoryAccessor,
    _entity: PhantomData<fn() -> E>,
}

impl<E, T> Repo<'_, E, T>
where
    E: Entity,
    T: Repository<E>,
{
    pub async fn get(&mut self, id: E::Id) -> CheckinResult<Option<E>> {
        self.accessor.reads += 1;
        self.tx.get(id).await
    }

    pub async fn add(&mut self, entity: &E) -> CheckinResult<AddOutcome> {
        self.accessor.writes += 1;
        let outcome = self.tx.add(entity).await?;
        if outcome == AddOutcome::Conflict {
            self.accessor.conflicts += 1;
        }
        Ok(outcome)
    }

    pub async fn find(&mut self, filter: &E::Filter) -> CheckinResult<Vec<E>> {
        self.accessor.reads += 1;
        self.tx.find(filter).await
    }

    /// First row matching `filter`
    pub async fn find_one(&mut self, filter: &E::Filter) -> CheckinResult<Option<E>> {
        Ok(self.find(filter).await?.into_iter().next())
    }
}

impl<E, T> Repo<'_, E, T>
where
    E: Entity,
    T: MutableRepository<E>,
{
    pub async fn update(&mut self, entity: &E) -> CheckinResult<()> {
        self.accessor.writes += 1;
        self.tx.update(entity).await
    }
}
