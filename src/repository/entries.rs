//! Cache entry records
//!
//! A put is one transaction:
//!
//! ```text
//! BEGIN
//!   AwaitTableWrite(table)      blocks behind any writer of the staging table
//!   EntryById(id) FOR UPDATE    serializes puts for the same id, stored or not
//!   current_time()              store clock, read after the wait
//!   UpsertEntry
//! COMMIT
//! ```
//!
//! Because the clock is read only after the table lock is granted, the
//! recorded local timestamp is never earlier than the moment the last
//! conflicting writer released the table.

use crate::error::StageCacheResult;
use crate::model::{validate_identifier, CacheEntry, CacheEntryUpdate};
use crate::store::{PersistenceHandle, Query, Row, Statement};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Create/read/update/delete of cache entries over one handle
pub struct CacheEntryStore<'h, H: PersistenceHandle + ?Sized> {
    handle: &'h mut H,
}

impl<'h, H: PersistenceHandle + ?Sized> CacheEntryStore<'h, H> {
    pub fn new(handle: &'h mut H) -> Self {
        Self { handle }
    }

    /// Read an entry; `None` when no entry has this id
    pub async fn get(&mut self, id: &str) -> StageCacheResult<Option<CacheEntry>> {
        validate_identifier("id", id)?;
        let rows = self
            .handle
            .query(Query::EntryById {
                id,
                for_update: false,
            })
            .await?;
        first_entry(rows)
    }

    /// Record an entry, returning the local timestamp it was stamped with
    ///
    /// Blocks while another session holds a write lock on
    /// `update.table_name`. Opens and closes its own transaction, so the
    /// handle must not already be inside one.
    pub async fn put(&mut self, update: &CacheEntryUpdate) -> StageCacheResult<DateTime<Utc>> {
        update.validate()?;

        self.handle.begin().await?;
        let local_timestamp = match self.put_in_transaction(update).await {
            Ok(local_timestamp) => local_timestamp,
            Err(err) => {
                if self.handle.in_transaction() {
                    if let Err(rollback) = self.handle.rollback().await {
                        warn!(
                            id = %update.id,
                            "Rollback after failed put also failed: {}",
                            rollback
                        );
                    }
                }
                return Err(err);
            }
        };
        self.handle.commit().await?;

        info!(
            id = %update.id,
            table = %update.table_name,
            local_timestamp = %local_timestamp,
            "Recorded cache entry"
        );
        Ok(local_timestamp)
    }

    async fn put_in_transaction(
        &mut self,
        update: &CacheEntryUpdate,
    ) -> StageCacheResult<DateTime<Utc>> {
        self.handle
            .execute(Statement::AwaitTableWrite {
                table: &update.table_name,
            })
            .await?;

        let previous = first_entry(
            self.handle
                .query(Query::EntryById {
                    id: &update.id,
                    for_update: true,
                })
                .await?,
        )?
        .and_then(|entry| entry.local_timestamp);

        let now = self.handle.current_time().await?;
        let local_timestamp = next_local_timestamp(previous, now);
        if local_timestamp != now {
            debug!(
                id = %update.id,
                store_clock = %now,
                "Store clock behind previous local timestamp, advancing"
            );
        }

        let entry = CacheEntry::from_update(update, local_timestamp);
        self.handle
            .execute(Statement::UpsertEntry { entry: &entry })
            .await?;
        Ok(local_timestamp)
    }

    /// Remove an entry; `false` when there was nothing to remove
    pub async fn delete(&mut self, id: &str) -> StageCacheResult<bool> {
        validate_identifier("id", id)?;
        let removed = self.handle.execute(Statement::DeleteEntry { id }).await?;
        if removed > 0 {
            info!(id, "Deleted cache entry");
        } else {
            debug!(id, "No cache entry to delete");
        }
        Ok(removed > 0)
    }
}

/// At most one entry comes back for an id
fn first_entry(rows: Vec<Row>) -> StageCacheResult<Option<CacheEntry>> {
    rows.into_iter().next().map(Row::into_entry).transpose()
}

/// The store clock, pushed past the previous stamp if it has not moved on
fn next_local_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    }
}
