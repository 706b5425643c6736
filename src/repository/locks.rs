//! Staging table locks
//!
//! ```text
//! UNLOCKED ── try_lock ok ──→ LOCKED(owner) ── release_lock(owner) ──→ UNLOCKED
//!                                  │          └─ release_all_lock ──→ UNLOCKED
//!                        try_lock → false (any owner, state unchanged)
//! ```
//!
//! Acquisition is a single insert against the lock table's primary key;
//! the store arbitrates races between processes. Locks are not reentrant.

use crate::error::{StageCacheError, StageCacheResult};
use crate::model::{validate_identifier, LockRecord};
use crate::store::{PersistenceHandle, Query, Row, Statement};
use tracing::{debug, info};

/// Lock records over one handle
pub struct LockRegistry<'h, H: PersistenceHandle + ?Sized> {
    handle: &'h mut H,
}

impl<'h, H: PersistenceHandle + ?Sized> LockRegistry<'h, H> {
    pub fn new(handle: &'h mut H) -> Self {
        Self { handle }
    }

    /// Claim `table_name` for `owner_id` without waiting
    ///
    /// Returns `false` when the table is already claimed by anyone,
    /// including the same owner and holder. Run it outside a transaction:
    /// on PostgreSQL a failed insert aborts the surrounding transaction.
    pub async fn try_lock(
        &mut self,
        owner_id: &str,
        holder: &str,
        table_name: &str,
    ) -> StageCacheResult<bool> {
        validate_identifier("owner_id", owner_id)?;
        validate_identifier("table_name", table_name)?;
        if holder.contains('\0') {
            return Err(StageCacheError::invalid_argument(
                "holder",
                "must not contain NUL bytes",
            ));
        }

        let record = LockRecord::new(owner_id, holder, table_name);
        match self
            .handle
            .execute(Statement::InsertLock { record: &record })
            .await
        {
            Ok(_) => {
                info!(table = table_name, owner = owner_id, holder, "Acquired table lock");
                Ok(true)
            }
            Err(StageCacheError::UniqueViolation { detail, .. }) => {
                debug!(table = table_name, owner = owner_id, %detail, "Table already locked");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Release every lock held by `owner_id`, returning how many were held
    pub async fn release_lock(&mut self, owner_id: &str) -> StageCacheResult<u64> {
        validate_identifier("owner_id", owner_id)?;
        let released = self
            .handle
            .execute(Statement::DeleteLocksByOwner { owner_id })
            .await?;
        info!(owner = owner_id, released, "Released table locks");
        Ok(released)
    }

    /// Release every lock regardless of owner
    ///
    /// For startup recovery, when a crashed process may have left locks
    /// behind with nobody to release them.
    pub async fn release_all_lock(&mut self) -> StageCacheResult<u64> {
        let released = self.handle.execute(Statement::DeleteAllLocks).await?;
        info!(released, "Released all table locks");
        Ok(released)
    }

    /// Live lock records, ordered by table name
    pub async fn list_locks(
        &mut self,
        owner_id: Option<&str>,
    ) -> StageCacheResult<Vec<LockRecord>> {
        if let Some(owner_id) = owner_id {
            validate_identifier("owner_id", owner_id)?;
        }
        self.handle
            .query(Query::Locks { owner_id })
            .await?
            .into_iter()
            .map(Row::into_lock)
            .collect()
    }
}
