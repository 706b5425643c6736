//! Persistence handle abstraction
//!
//! The repository never talks to a database directly. It drives a
//! [`PersistenceHandle`] with a small set of typed statements and queries,
//! and every coordination guarantee it offers comes from how the backing
//! store executes them:
//!
//! - `AwaitTableWrite` must block on the store's own table lock until any
//!   concurrent writer to that table has finished
//! - `InsertLock` must fail with [`StageCacheError::UniqueViolation`] when
//!   the table is already claimed
//! - `current_time` must read the store clock at the moment of the call,
//!   not at transaction start
//!
//! Backends:
//! - [`postgres`]: `tokio-postgres` over a `deadpool` pool
//! - [`memory`]: in-process store for tests and single-host tooling
//!
//! [`StageCacheError::UniqueViolation`]: crate::error::StageCacheError::UniqueViolation

pub mod memory;
pub mod postgres;

pub use memory::{MemoryHandle, MemoryStore, TableWriteLock};
pub use postgres::{PgHandle, PgStore};

use crate::error::{StageCacheError, StageCacheResult};
use crate::model::{CacheEntry, LockRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A write the repository asks the store to perform
#[derive(Debug, Clone, Copy)]
pub enum Statement<'a> {
    /// Wait until no other session holds a write lock on `table`, then keep
    /// writers out until the current transaction ends
    AwaitTableWrite { table: &'a str },
    /// Insert the entry or fully overwrite the row with the same id
    UpsertEntry { entry: &'a CacheEntry },
    /// Remove the entry with this id
    DeleteEntry { id: &'a str },
    /// Claim a table; fails with a unique violation if already claimed
    InsertLock { record: &'a LockRecord },
    /// Remove every lock held by this owner
    DeleteLocksByOwner { owner_id: &'a str },
    /// Remove every lock
    DeleteAllLocks,
}

impl Statement<'_> {
    /// Short name used in logs and error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitTableWrite { .. } => "await-table-write",
            Self::UpsertEntry { .. } => "upsert-entry",
            Self::DeleteEntry { .. } => "delete-entry",
            Self::InsertLock { .. } => "insert-lock",
            Self::DeleteLocksByOwner { .. } => "delete-locks-by-owner",
            Self::DeleteAllLocks => "delete-all-locks",
        }
    }
}

/// A read the repository asks the store to perform
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    /// The entry with this id; `for_update` locks the id until the
    /// transaction ends, whether or not a row exists yet
    EntryById { id: &'a str, for_update: bool },
    /// Lock records ordered by table name, optionally for one owner
    Locks { owner_id: Option<&'a str> },
}

impl Query<'_> {
    /// Short name used in logs and error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntryById { .. } => "entry-by-id",
            Self::Locks { .. } => "locks",
        }
    }
}

/// A row produced by a [`Query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Entry(CacheEntry),
    Lock(LockRecord),
}

impl Row {
    /// Unwrap an entry row, rejecting any other shape
    pub fn into_entry(self) -> StageCacheResult<CacheEntry> {
        match self {
            Self::Entry(entry) => Ok(entry),
            Self::Lock(_) => Err(StageCacheError::UnexpectedRow {
                query: "entry-by-id",
            }),
        }
    }

    /// Unwrap a lock row, rejecting any other shape
    pub fn into_lock(self) -> StageCacheResult<LockRecord> {
        match self {
            Self::Lock(record) => Ok(record),
            Self::Entry(_) => Err(StageCacheError::UnexpectedRow { query: "locks" }),
        }
    }
}

/// Transactional connection to a backing store
///
/// One handle is one session: statements outside `begin`/`commit` run in
/// autocommit mode. Handles are not shared between concurrent units of
/// work; create one per task.
#[async_trait]
pub trait PersistenceHandle: Send {
    /// Open a transaction; fails if one is already open
    async fn begin(&mut self) -> StageCacheResult<()>;

    /// Make the open transaction's writes visible atomically
    async fn commit(&mut self) -> StageCacheResult<()>;

    /// Discard the open transaction's writes and release its locks
    async fn rollback(&mut self) -> StageCacheResult<()>;

    /// Whether a transaction is open
    fn in_transaction(&self) -> bool;

    /// Execute a statement, returning the number of affected rows
    async fn execute(&mut self, statement: Statement<'_>) -> StageCacheResult<u64>;

    /// Run a query
    async fn query(&mut self, query: Query<'_>) -> StageCacheResult<Vec<Row>>;

    /// Read the store clock
    async fn current_time(&mut self) -> StageCacheResult<DateTime<Utc>>;

    /// Create the registry tables if they do not exist
    async fn ensure_schema(&mut self) -> StageCacheResult<()>;

    /// Backend name for diagnostics
    fn backend_name(&self) -> &'static str;
}
