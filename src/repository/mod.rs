//! Cache info repository
//!
//! The public contract loader orchestrators use. A repository wraps one
//! persistence handle and is meant for one unit of work at a time; run
//! several in parallel by giving each its own handle.
//!
//! Typical load:
//!
//! 1. `try_lock(owner, holder, table)`; skip or retry later on `false`
//! 2. transfer data into the staging table
//! 3. `put_cache_info(update)` to record the new freshness state
//! 4. `release_lock(owner)`
//!
//! After a crash, call `release_all_lock()` once before resuming.

pub mod entries;
pub mod locks;

pub use entries::CacheEntryStore;
pub use locks::LockRegistry;

use crate::error::StageCacheResult;
use crate::model::{CacheEntry, CacheEntryUpdate, LockRecord};
use crate::store::PersistenceHandle;
use chrono::{DateTime, Utc};

/// Facade over [`CacheEntryStore`] and [`LockRegistry`]
pub struct CacheInfoRepository<H: PersistenceHandle> {
    handle: H,
}

impl<H: PersistenceHandle> CacheInfoRepository<H> {
    /// Wrap a caller-supplied handle
    pub fn new(handle: H) -> Self {
        Self { handle }
    }

    /// Cache entry operations
    pub fn entries(&mut self) -> CacheEntryStore<'_, H> {
        CacheEntryStore::new(&mut self.handle)
    }

    /// Lock operations
    pub fn locks(&mut self) -> LockRegistry<'_, H> {
        LockRegistry::new(&mut self.handle)
    }

    /// Create the registry tables if needed
    pub async fn ensure_schema(&mut self) -> StageCacheResult<()> {
        self.handle.ensure_schema().await
    }

    pub async fn get_cache_info(&mut self, id: &str) -> StageCacheResult<Option<CacheEntry>> {
        self.entries().get(id).await
    }

    /// Record freshness state; may block behind writers of the staging table
    pub async fn put_cache_info(
        &mut self,
        update: &CacheEntryUpdate,
    ) -> StageCacheResult<DateTime<Utc>> {
        self.entries().put(update).await
    }

    pub async fn delete_cache_info(&mut self, id: &str) -> StageCacheResult<bool> {
        self.entries().delete(id).await
    }

    pub async fn try_lock(
        &mut self,
        owner_id: &str,
        holder: &str,
        table_name: &str,
    ) -> StageCacheResult<bool> {
        self.locks().try_lock(owner_id, holder, table_name).await
    }

    pub async fn release_lock(&mut self, owner_id: &str) -> StageCacheResult<u64> {
        self.locks().release_lock(owner_id).await
    }

    pub async fn release_all_lock(&mut self) -> StageCacheResult<u64> {
        self.locks().release_all_lock().await
    }

    pub async fn list_locks(
        &mut self,
        owner_id: Option<&str>,
    ) -> StageCacheResult<Vec<LockRecord>> {
        self.locks().list_locks(owner_id).await
    }

    /// The wrapped handle
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Give the handle back, e.g. to return it to a pool
    pub fn into_handle(self) -> H {
        self.handle
    }
}
