//! In-process backing store
//!
//! A `MemoryStore` is the shared "database"; each [`MemoryHandle`] is one
//! session against it, the way each loader process holds its own
//! connection. The store models the locking behavior the repository relies
//! on:
//!
//! | Store primitive | Model |
//! |-----------------|-------|
//! | Table write lock held by another process | [`MemoryStore::lock_table`] (exclusive) |
//! | `AwaitTableWrite` | shared acquire on the same fair `RwLock` |
//! | `SELECT ... FOR UPDATE` | per-id `Mutex` held until transaction end |
//! | Primary key on lock table | unique check at execute and again at commit |
//! | Store clock | monotonic, never returns the same reading twice |
//!
//! Transactions buffer their writes and apply them in one step at commit,
//! so other sessions never see a half-applied put.

use super::postgres::fold_ident;
use super::{PersistenceHandle, Query, Row, Statement};
use crate::error::{StageCacheError, StageCacheResult};
use crate::model::{CacheEntry, LockRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Logical table names used in unique-violation errors
const ENTRY_TABLE: &str = "cache_entry";
const LOCK_TABLE: &str = "cache_lock";

#[derive(Debug, Clone, Default)]
struct Tables {
    entries: BTreeMap<String, CacheEntry>,
    locks: BTreeMap<String, LockRecord>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    table_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    row_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

/// Shared in-process store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this store
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            store: self.clone(),
            tx: None,
        }
    }

    /// Take an exclusive write lock on a physical table, as an unrelated
    /// process running a long mutation would
    ///
    /// Waits for current holders. The lock is held until the returned
    /// guard is released or dropped.
    pub async fn lock_table(&self, table: &str) -> TableWriteLock {
        let lock = self.table_lock(table).await;
        let guard = lock.write_owned().await;
        debug!(table, "Acquired exclusive table lock");
        TableWriteLock {
            table: table.to_string(),
            _guard: guard,
        }
    }

    /// Read the store clock
    pub async fn now(&self) -> DateTime<Utc> {
        let mut last = self.shared.last_tick.lock().await;
        let now = Utc::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    /// Keyed by the name PostgreSQL would resolve, so `Orders` and
    /// `orders` are the same table
    async fn table_lock(&self, table: &str) -> Arc<RwLock<()>> {
        let mut locks = self.shared.table_locks.lock().await;
        locks.entry(fold_ident(table)).or_default().clone()
    }

    async fn row_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.shared.row_locks.lock().await;
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Forget table and row locks nobody holds or waits for
    async fn prune_locks(&self) {
        self.shared
            .table_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.shared
            .row_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Exclusive lock on a physical table, released on drop
pub struct TableWriteLock {
    table: String,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl TableWriteLock {
    /// Name of the locked table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Release the lock
    pub fn release(self) {
        debug!(table = %self.table, "Released exclusive table lock");
    }
}

/// Owned form of a write statement, replayed at commit
#[derive(Debug, Clone)]
enum Write {
    Upsert(CacheEntry),
    DeleteEntry(String),
    InsertLock(LockRecord),
    DeleteLocksByOwner(String),
    DeleteAllLocks,
}

impl Write {
    fn from_statement(statement: &Statement<'_>) -> Option<Self> {
        match *statement {
            Statement::AwaitTableWrite { .. } => None,
            Statement::UpsertEntry { entry } => Some(Self::Upsert(entry.clone())),
            Statement::DeleteEntry { id } => Some(Self::DeleteEntry(id.to_string())),
            Statement::InsertLock { record } => Some(Self::InsertLock(record.clone())),
            Statement::DeleteLocksByOwner { owner_id } => {
                Some(Self::DeleteLocksByOwner(owner_id.to_string()))
            }
            Statement::DeleteAllLocks => Some(Self::DeleteAllLocks),
        }
    }

    fn apply(&self, tables: &mut Tables) -> StageCacheResult<u64> {
        match self {
            Self::Upsert(entry) => {
                tables.entries.insert(entry.id.clone(), entry.clone());
                Ok(1)
            }
            Self::DeleteEntry(id) => Ok(u64::from(tables.entries.remove(id).is_some())),
            Self::InsertLock(record) => {
                if let Some(existing) = tables.locks.get(&record.table_name) {
                    return Err(StageCacheError::UniqueViolation {
                        table: LOCK_TABLE.to_string(),
                        detail: format!(
                            "table_name={} held by {}",
                            existing.table_name, existing.owner_id
                        ),
                    });
                }
                tables
                    .locks
                    .insert(record.table_name.clone(), record.clone());
                Ok(1)
            }
            Self::DeleteLocksByOwner(owner_id) => {
                let before = tables.locks.len();
                tables.locks.retain(|_, record| record.owner_id != *owner_id);
                Ok((before - tables.locks.len()) as u64)
            }
            Self::DeleteAllLocks => {
                let removed = tables.locks.len() as u64;
                tables.locks.clear();
                Ok(removed)
            }
        }
    }
}

#[derive(Default)]
struct Transaction {
    writes: Vec<Write>,
    table_guards: HashMap<String, OwnedRwLockReadGuard<()>>,
    row_guards: HashMap<String, OwnedMutexGuard<()>>,
}

impl Transaction {
    /// Committed state with this transaction's pending writes applied
    fn view(&self, committed: &Tables) -> StageCacheResult<Tables> {
        let mut view = committed.clone();
        for write in &self.writes {
            write.apply(&mut view)?;
        }
        Ok(view)
    }
}

/// One session against a [`MemoryStore`]
pub struct MemoryHandle {
    store: MemoryStore,
    tx: Option<Transaction>,
}

impl MemoryHandle {
    async fn await_table_write(&mut self, table: &str) -> StageCacheResult<()> {
        let key = fold_ident(table);
        let already_held = match &self.tx {
            Some(tx) => tx.table_guards.contains_key(&key),
            None => {
                return Err(StageCacheError::NoTransaction {
                    operation: "await-table-write",
                })
            }
        };
        if already_held {
            return Ok(());
        }

        let lock = self.store.table_lock(table).await;
        debug!(table, "Waiting for table write lock");
        let guard = lock.read_owned().await;
        if let Some(tx) = self.tx.as_mut() {
            tx.table_guards.insert(key, guard);
        }
        Ok(())
    }

    async fn lock_row(&mut self, id: &str) {
        let held = match &self.tx {
            Some(tx) => tx.row_guards.contains_key(id),
            None => return,
        };
        if held {
            return;
        }

        let lock = self.store.row_lock(id).await;
        let guard = lock.lock_owned().await;
        if let Some(tx) = self.tx.as_mut() {
            tx.row_guards.insert(id.to_string(), guard);
        }
    }

    async fn snapshot(&self) -> StageCacheResult<Tables> {
        let committed = self.store.shared.tables.lock().await;
        match &self.tx {
            Some(tx) => tx.view(&committed),
            None => Ok(committed.clone()),
        }
    }
}

#[async_trait]
impl PersistenceHandle for MemoryHandle {
    async fn begin(&mut self) -> StageCacheResult<()> {
        if self.tx.is_some() {
            return Err(StageCacheError::TransactionOpen);
        }
        self.tx = Some(Transaction::default());
        Ok(())
    }

    async fn commit(&mut self) -> StageCacheResult<()> {
        let tx = self.tx.take().ok_or(StageCacheError::NoTransaction {
            operation: "commit",
        })?;
        let writes = tx.writes.len();

        let applied = {
            let mut committed = self.store.shared.tables.lock().await;
            tx.view(&committed).map(|next| *committed = next)
        };
        drop(tx);
        self.store.prune_locks().await;

        applied?;
        debug!(writes, "Committed memory transaction");
        Ok(())
    }

    async fn rollback(&mut self) -> StageCacheResult<()> {
        let tx = self.tx.take().ok_or(StageCacheError::NoTransaction {
            operation: "rollback",
        })?;
        let writes = tx.writes.len();
        drop(tx);
        self.store.prune_locks().await;

        debug!(writes, "Rolled back memory transaction");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn execute(&mut self, statement: Statement<'_>) -> StageCacheResult<u64> {
        let write = match Write::from_statement(&statement) {
            Some(write) => write,
            None => {
                if let Statement::AwaitTableWrite { table } = statement {
                    self.await_table_write(table).await?;
                }
                return Ok(0);
            }
        };

        match self.tx.as_mut() {
            Some(tx) => {
                let committed = self.store.shared.tables.lock().await;
                let mut view = tx.view(&committed)?;
                let affected = write.apply(&mut view)?;
                tx.writes.push(write);
                Ok(affected)
            }
            None => {
                let mut committed = self.store.shared.tables.lock().await;
                write.apply(&mut committed)
            }
        }
    }

    async fn query(&mut self, query: Query<'_>) -> StageCacheResult<Vec<Row>> {
        match query {
            Query::EntryById { id, for_update } => {
                if for_update {
                    self.lock_row(id).await;
                }
                let tables = self.snapshot().await?;
                Ok(tables.entries.get(id).cloned().map(Row::Entry).into_iter().collect())
            }
            Query::Locks { owner_id } => {
                let tables = self.snapshot().await?;
                Ok(tables
                    .locks
                    .into_values()
                    .filter(|record| owner_id.map_or(true, |owner| record.owner_id == owner))
                    .map(Row::Lock)
                    .collect())
            }
        }
    }

    async fn current_time(&mut self) -> StageCacheResult<DateTime<Utc>> {
        Ok(self.store.now().await)
    }

    async fn ensure_schema(&mut self) -> StageCacheResult<()> {
        debug!(entries = ENTRY_TABLE, locks = LOCK_TABLE, "Memory schema is implicit");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
