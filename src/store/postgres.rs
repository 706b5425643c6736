//! PostgreSQL backing store
//!
//! Connections come from a `deadpool-postgres` pool. The blocking put relies
//! on `LOCK TABLE ... IN SHARE MODE`: it conflicts with the ROW EXCLUSIVE
//! lock every writer takes and with explicit EXCLUSIVE locks, so it waits
//! for in-flight mutations of the staging table and keeps new ones out
//! until the put commits. The store clock is `clock_timestamp()`; `now()`
//! is frozen at transaction start and would predate the wait.

use super::{PersistenceHandle, Query, Row, Statement};
use crate::config::schema::{DatabaseConfig, SchemaConfig};
use crate::error::{StageCacheError, StageCacheResult};
use crate::model::{CacheEntry, LockRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// Quote a possibly schema-qualified table name for interpolation into SQL
///
/// Plain identifiers are folded to lower case the way PostgreSQL folds
/// unquoted names; anything else is quoted verbatim with `"` doubled.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", fold_ident_part(part).replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// The name PostgreSQL resolves `name` to, segment by segment
pub fn fold_ident(name: &str) -> String {
    name.split('.').map(fold_ident_part).collect::<Vec<_>>().join(".")
}

fn fold_ident_part(part: &str) -> String {
    if is_plain_identifier(part) {
        part.to_ascii_lowercase()
    } else {
        part.to_string()
    }
}

/// `[A-Za-z_][A-Za-z0-9_$]*`
pub fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// SQL text for one schema configuration
#[derive(Debug, Clone)]
struct SqlText {
    entry_table: String,
    lock_table: String,
    create_schema: String,
    select_entry: String,
    select_entry_for_update: String,
    lock_entry_id: String,
    upsert_entry: String,
    delete_entry: String,
    insert_lock: String,
    delete_locks_by_owner: String,
    delete_all_locks: String,
    select_locks: String,
    select_locks_by_owner: String,
}

impl SqlText {
    fn new(schema: &SchemaConfig) -> Self {
        let entry = quote_ident(&schema.entry_table);
        let lock = quote_ident(&schema.lock_table);
        let owner_index = quote_ident(&format!("{}_owner_idx", schema.lock_table));
        let entry_columns = "id, table_name, path, local_timestamp, remote_timestamp";

        Self {
            entry_table: schema.entry_table.clone(),
            lock_table: schema.lock_table.clone(),
            create_schema: format!(
                "CREATE TABLE IF NOT EXISTS {entry} (\
                     id VARCHAR(128) PRIMARY KEY, \
                     table_name VARCHAR(128) NOT NULL, \
                     path TEXT NOT NULL, \
                     local_timestamp TIMESTAMPTZ, \
                     remote_timestamp TIMESTAMPTZ); \
                 CREATE TABLE IF NOT EXISTS {lock} (\
                     table_name VARCHAR(128) PRIMARY KEY, \
                     owner_id VARCHAR(128) NOT NULL, \
                     holder TEXT NOT NULL); \
                 CREATE INDEX IF NOT EXISTS {owner_index} ON {lock} (owner_id);"
            ),
            select_entry: format!("SELECT {entry_columns} FROM {entry} WHERE id = $1"),
            select_entry_for_update: format!(
                "SELECT {entry_columns} FROM {entry} WHERE id = $1 FOR UPDATE"
            ),
            // FOR UPDATE locks nothing while the row is absent; the advisory
            // lock also covers first puts and puts after a delete
            lock_entry_id: "SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))"
                .to_string(),
            upsert_entry: format!(
                "INSERT INTO {entry} ({entry_columns}) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO UPDATE SET \
                     table_name = EXCLUDED.table_name, \
                     path = EXCLUDED.path, \
                     local_timestamp = EXCLUDED.local_timestamp, \
                     remote_timestamp = EXCLUDED.remote_timestamp"
            ),
            delete_entry: format!("DELETE FROM {entry} WHERE id = $1"),
            insert_lock: format!(
                "INSERT INTO {lock} (table_name, owner_id, holder) VALUES ($1, $2, $3)"
            ),
            delete_locks_by_owner: format!("DELETE FROM {lock} WHERE owner_id = $1"),
            delete_all_locks: format!("DELETE FROM {lock}"),
            select_locks: format!(
                "SELECT table_name, owner_id, holder FROM {lock} ORDER BY table_name"
            ),
            select_locks_by_owner: format!(
                "SELECT table_name, owner_id, holder FROM {lock} \
                 WHERE owner_id = $1 ORDER BY table_name"
            ),
        }
    }
}

/// Translate a driver error, keeping unique violations distinguishable
fn map_pg_error(context: &str, table: &str, err: tokio_postgres::Error) -> StageCacheError {
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        if code == &SqlState::UNIQUE_VIOLATION {
            return StageCacheError::UniqueViolation {
                table: db.table().unwrap_or(table).to_string(),
                detail: db.detail().unwrap_or_else(|| db.message()).to_string(),
            };
        }
        if code == &SqlState::T_R_SERIALIZATION_FAILURE
            || code == &SqlState::T_R_DEADLOCK_DETECTED
            || code == &SqlState::ADMIN_SHUTDOWN
        {
            return StageCacheError::transient(context, err);
        }
        return StageCacheError::persistence(context, err);
    }
    // No server error attached: the connection itself failed
    StageCacheError::transient(context, err)
}

/// Connection pool for the registry database
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    sql: SqlText,
}

impl PgStore {
    /// Build a pool from configuration; connections are opened on demand
    pub fn connect(database: &DatabaseConfig, schema: &SchemaConfig) -> StageCacheResult<Self> {
        let url = database
            .url
            .clone()
            .ok_or(StageCacheError::DatabaseUrlMissing)?;
        let timeout = Duration::from_secs(database.connect_timeout_secs);

        let mut pool_config = PoolConfig::new(database.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);

        let mut cfg = Config::new();
        cfg.url = Some(url);
        cfg.pool = Some(pool_config);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StageCacheError::persistence("creating connection pool", e))?;

        debug!(pool_size = database.pool_size, "Created PostgreSQL pool");
        Ok(Self {
            pool,
            sql: SqlText::new(schema),
        })
    }

    /// Check out one session
    pub async fn handle(&self) -> StageCacheResult<PgHandle> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StageCacheError::transient("acquiring database connection", e))?;
        Ok(PgHandle {
            client: Some(client),
            sql: self.sql.clone(),
            in_tx: false,
        })
    }
}

/// One pooled PostgreSQL session
///
/// A handle dropped with a transaction still open is detached from the
/// pool and closed, so the server rolls the transaction back and releases
/// its table and row locks.
pub struct PgHandle {
    client: Option<Object>,
    sql: SqlText,
    in_tx: bool,
}

impl PgHandle {
    fn client(&self) -> StageCacheResult<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| StageCacheError::Internal("connection already released".to_string()))
    }

    async fn run(&self, context: &str, table: &str, sql: &str) -> StageCacheResult<()> {
        self.client()?
            .batch_execute(sql)
            .await
            .map_err(|e| map_pg_error(context, table, e))
    }

    fn entry_from_row(&self, row: &tokio_postgres::Row) -> StageCacheResult<CacheEntry> {
        let table = &self.sql.entry_table;
        let read = |e| map_pg_error("decoding cache entry", table, e);
        Ok(CacheEntry {
            id: row.try_get("id").map_err(read)?,
            table_name: row.try_get("table_name").map_err(read)?,
            path: row.try_get("path").map_err(read)?,
            local_timestamp: row.try_get("local_timestamp").map_err(read)?,
            remote_timestamp: row.try_get("remote_timestamp").map_err(read)?,
        })
    }

    fn lock_from_row(&self, row: &tokio_postgres::Row) -> StageCacheResult<LockRecord> {
        let table = &self.sql.lock_table;
        let read = |e| map_pg_error("decoding lock record", table, e);
        Ok(LockRecord {
            table_name: row.try_get("table_name").map_err(read)?,
            owner_id: row.try_get("owner_id").map_err(read)?,
            holder: row.try_get("holder").map_err(read)?,
        })
    }
}

#[async_trait]
impl PersistenceHandle for PgHandle {
    async fn begin(&mut self) -> StageCacheResult<()> {
        if self.in_tx {
            return Err(StageCacheError::TransactionOpen);
        }
        self.run("beginning transaction", "", "BEGIN").await?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> StageCacheResult<()> {
        if !self.in_tx {
            return Err(StageCacheError::NoTransaction {
                operation: "commit",
            });
        }
        self.in_tx = false;
        self.run("committing transaction", "", "COMMIT").await
    }

    async fn rollback(&mut self) -> StageCacheResult<()> {
        if !self.in_tx {
            return Err(StageCacheError::NoTransaction {
                operation: "rollback",
            });
        }
        self.in_tx = false;
        self.run("rolling back transaction", "", "ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn execute(&mut self, statement: Statement<'_>) -> StageCacheResult<u64> {
        let context = statement.name();
        let client = self.client()?;
        let sql = &self.sql;

        let result = match statement {
            Statement::AwaitTableWrite { table } => {
                if !self.in_tx {
                    return Err(StageCacheError::NoTransaction {
                        operation: "await-table-write",
                    });
                }
                let lock_sql = format!("LOCK TABLE {} IN SHARE MODE", quote_ident(table));
                debug!(table, "Waiting for table write lock");
                return client
                    .batch_execute(&lock_sql)
                    .await
                    .map(|()| 0)
                    .map_err(|e| map_pg_error(context, table, e));
            }
            Statement::UpsertEntry { entry } => {
                client
                    .execute(
                        sql.upsert_entry.as_str(),
                        &[
                            &entry.id,
                            &entry.table_name,
                            &entry.path,
                            &entry.local_timestamp,
                            &entry.remote_timestamp,
                        ],
                    )
                    .await
            }
            Statement::DeleteEntry { id } => {
                client.execute(sql.delete_entry.as_str(), &[&id]).await
            }
            Statement::InsertLock { record } => {
                client
                    .execute(
                        sql.insert_lock.as_str(),
                        &[&record.table_name, &record.owner_id, &record.holder],
                    )
                    .await
            }
            Statement::DeleteLocksByOwner { owner_id } => {
                client
                    .execute(sql.delete_locks_by_owner.as_str(), &[&owner_id])
                    .await
            }
            Statement::DeleteAllLocks => client.execute(sql.delete_all_locks.as_str(), &[]).await,
        };

        let table = match statement {
            Statement::UpsertEntry { .. } | Statement::DeleteEntry { .. } => &sql.entry_table,
            _ => &sql.lock_table,
        };
        result.map_err(|e| map_pg_error(context, table, e))
    }

    async fn query(&mut self, query: Query<'_>) -> StageCacheResult<Vec<Row>> {
        let context = query.name();
        let client = self.client()?;

        match query {
            Query::EntryById { id, for_update } => {
                let sql = if for_update {
                    debug!(id, "Waiting for entry lock");
                    let key = [&self.sql.entry_table as &(dyn ToSql + Sync), &id];
                    client
                        .execute(self.sql.lock_entry_id.as_str(), &key)
                        .await
                        .map_err(|e| map_pg_error(context, &self.sql.entry_table, e))?;
                    &self.sql.select_entry_for_update
                } else {
                    &self.sql.select_entry
                };
                let rows = client
                    .query(sql.as_str(), &[&id])
                    .await
                    .map_err(|e| map_pg_error(context, &self.sql.entry_table, e))?;
                rows.iter()
                    .map(|row| self.entry_from_row(row).map(Row::Entry))
                    .collect()
            }
            Query::Locks { owner_id } => {
                let rows = match owner_id {
                    Some(owner) => {
                        client
                            .query(self.sql.select_locks_by_owner.as_str(), &[&owner])
                            .await
                    }
                    None => client.query(self.sql.select_locks.as_str(), &[]).await,
                }
                .map_err(|e| map_pg_error(context, &self.sql.lock_table, e))?;
                rows.iter()
                    .map(|row| self.lock_from_row(row).map(Row::Lock))
                    .collect()
            }
        }
    }

    async fn current_time(&mut self) -> StageCacheResult<DateTime<Utc>> {
        let row = self
            .client()?
            .query_one("SELECT clock_timestamp()", &[])
            .await
            .map_err(|e| map_pg_error("reading store clock", "", e))?;
        row.try_get(0)
            .map_err(|e| map_pg_error("decoding store clock", "", e))
    }

    async fn ensure_schema(&mut self) -> StageCacheResult<()> {
        let table = self.sql.lock_table.clone();
        self.run("creating schema", &table, &self.sql.create_schema)
            .await?;
        info!(
            entries = %self.sql.entry_table,
            locks = %self.sql.lock_table,
            "Registry schema ready"
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

impl Drop for PgHandle {
    fn drop(&mut self) {
        if !self.in_tx {
            return;
        }
        if let Some(client) = self.client.take() {
            warn!("Closing connection with an open transaction");
            drop(Object::take(client));
        }
    }
}
