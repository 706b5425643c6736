//! Repository scenarios against a live PostgreSQL server
//!
//! Enabled with `--features pg-tests`; set `STAGECACHE_TEST_DATABASE_URL`
//! to a database the tests may create tables in.

#![cfg(feature = "pg-tests")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serial_test::serial;
use stagecache::config::schema::{DatabaseConfig, SchemaConfig};
use stagecache::model::CacheEntryUpdate;
use stagecache::store::{PersistenceHandle, PgHandle, PgStore, Query, Row, Statement};
use stagecache::{CacheInfoRepository, StageCacheError, StageCacheResult};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_postgres::NoTls;

const STAGE_TABLE: &str = "stagecache_it_stage";
const OTHER_TABLE: &str = "stagecache_it_other";
const MISSING_TABLE: &str = "stagecache_it_missing";
const HOLD: Duration = Duration::from_millis(500);

fn database_url() -> String {
    std::env::var("STAGECACHE_TEST_DATABASE_URL")
        .expect("STAGECACHE_TEST_DATABASE_URL must be set for pg-tests")
}

async fn raw_client() -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(&database_url(), NoTls)
        .await
        .unwrap();
    tokio::spawn(connection);
    client
}

async fn handle() -> PgHandle {
    let database = DatabaseConfig {
        url: Some(database_url()),
        ..DatabaseConfig::default()
    };
    let schema = SchemaConfig {
        entry_table: "stagecache_it_entry".to_string(),
        lock_table: "stagecache_it_lock".to_string(),
    };
    let store = PgStore::connect(&database, &schema).unwrap();
    store.handle().await.unwrap()
}

async fn repository() -> CacheInfoRepository<PgHandle> {
    let mut repo = CacheInfoRepository::new(handle().await);
    repo.ensure_schema().await.unwrap();
    repo
}

async fn reset(repo: &mut CacheInfoRepository<PgHandle>) {
    repo.release_all_lock().await.unwrap();
    repo.delete_cache_info("orders").await.unwrap();
    raw_client()
        .await
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {STAGE_TABLE} (n INTEGER); \
             CREATE TABLE IF NOT EXISTS {OTHER_TABLE} (n INTEGER); \
             DROP TABLE IF EXISTS {MISSING_TABLE}"
        ))
        .await
        .unwrap();
}

/// Hold an EXCLUSIVE lock on `table` for [`HOLD`] from another session,
/// returning the server time just before the commit that releases it
async fn spawn_table_writer(table: &'static str) -> tokio::task::JoinHandle<DateTime<Utc>> {
    let (locked_tx, locked_rx) = oneshot::channel();
    let writer = tokio::spawn(async move {
        let client = raw_client().await;
        client
            .batch_execute(&format!("BEGIN; LOCK TABLE {table} IN EXCLUSIVE MODE"))
            .await
            .unwrap();
        let _ = locked_tx.send(());
        sleep(HOLD).await;
        let row = client.query_one("SELECT clock_timestamp()", &[]).await.unwrap();
        let released_at: DateTime<Utc> = row.get(0);
        client.batch_execute("COMMIT").await.unwrap();
        released_at
    });
    locked_rx.await.unwrap();
    writer
}

/// Session that stalls before writing the entry row, as a slow network
/// or a descheduled loader would
struct StalledUpsert {
    inner: PgHandle,
    stall: Duration,
}

#[async_trait]
impl PersistenceHandle for StalledUpsert {
    async fn begin(&mut self) -> StageCacheResult<()> {
        self.inner.begin().await
    }

    async fn commit(&mut self) -> StageCacheResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> StageCacheResult<()> {
        self.inner.rollback().await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn execute(&mut self, statement: Statement<'_>) -> StageCacheResult<u64> {
        if matches!(statement, Statement::UpsertEntry { .. }) {
            sleep(self.stall).await;
        }
        self.inner.execute(statement).await
    }

    async fn query(&mut self, query: Query<'_>) -> StageCacheResult<Vec<Row>> {
        self.inner.query(query).await
    }

    async fn current_time(&mut self) -> StageCacheResult<DateTime<Utc>> {
        self.inner.current_time().await
    }

    async fn ensure_schema(&mut self) -> StageCacheResult<()> {
        self.inner.ensure_schema().await
    }

    fn backend_name(&self) -> &'static str {
        "stalled-postgres"
    }
}

#[tokio::test]
#[serial]
async fn put_waits_for_table_writer() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let writer = spawn_table_writer(STAGE_TABLE).await;

    let started = Instant::now();
    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/cache/orders"))
        .await
        .unwrap();
    assert!(started.elapsed() >= HOLD / 2);

    let released_at = writer.await.unwrap();
    assert!(stamped >= released_at);

    let entry = repo.get_cache_info("orders").await.unwrap().unwrap();
    assert_eq!(entry.local_timestamp, Some(stamped));
    assert_eq!(entry.table_name, STAGE_TABLE);
}

#[tokio::test]
#[serial]
async fn overwrite_is_strictly_increasing() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let first = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/a"))
        .await
        .unwrap();
    let second = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/b"))
        .await
        .unwrap();
    assert!(second > first);

    let entry = repo.get_cache_info("orders").await.unwrap().unwrap();
    assert_eq!(entry.path, "/b");
    assert!(repo.delete_cache_info("orders").await.unwrap());
    assert!(!repo.delete_cache_info("orders").await.unwrap());
}

#[tokio::test]
#[serial]
async fn lock_lifecycle() {
    let mut repo = repository().await;
    let mut other = repository().await;
    reset(&mut repo).await;

    assert!(repo.try_lock("exec-1", "loader", "T1").await.unwrap());
    assert!(!other.try_lock("exec-2", "loader", "T1").await.unwrap());
    assert!(!repo.try_lock("exec-1", "loader", "T1").await.unwrap());
    assert!(other.try_lock("exec-2", "loader", "T2").await.unwrap());

    let held = repo.list_locks(None).await.unwrap();
    assert_eq!(held.len(), 2);
    assert_eq!(held[0].table_name, "T1");

    assert_eq!(repo.release_lock("exec-1").await.unwrap(), 1);
    assert!(other.try_lock("exec-2", "loader", "T1").await.unwrap());
    assert_eq!(repo.release_all_lock().await.unwrap(), 2);
    assert!(repo.list_locks(Some("exec-2")).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn put_waits_for_writer_under_folded_name() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let writer = spawn_table_writer(STAGE_TABLE).await;
    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new(
            "orders",
            STAGE_TABLE.to_ascii_uppercase(),
            "/cache/orders",
        ))
        .await
        .unwrap();

    let released_at = writer.await.unwrap();
    assert!(stamped >= released_at);
}

#[tokio::test]
#[serial]
async fn put_ignores_writers_of_other_tables() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let writer = spawn_table_writer(OTHER_TABLE).await;
    let started = Instant::now();
    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/cache/orders"))
        .await
        .unwrap();
    assert!(started.elapsed() < HOLD);

    let released_at = writer.await.unwrap();
    assert!(stamped < released_at);
}

#[tokio::test]
#[serial]
async fn racing_first_puts_never_move_the_stamp_back() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let stalled = tokio::spawn(async move {
        let mut slow = CacheInfoRepository::new(StalledUpsert {
            inner: handle().await,
            stall: HOLD,
        });
        slow.put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/a"))
            .await
            .unwrap()
    });
    sleep(Duration::from_millis(100)).await;

    let mut fast = repository().await;
    let fast_stamp = fast
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/b"))
        .await
        .unwrap();
    let slow_stamp = stalled.await.unwrap();

    assert_ne!(slow_stamp, fast_stamp);
    let stored = repo.get_cache_info("orders").await.unwrap().unwrap();
    let latest = slow_stamp.max(fast_stamp);
    assert_eq!(stored.local_timestamp, Some(latest));
    let expected_path = if latest == fast_stamp { "/b" } else { "/a" };
    assert_eq!(stored.path, expected_path);
}

#[tokio::test]
#[serial]
async fn failed_put_rolls_back_and_session_stays_usable() {
    let mut repo = repository().await;
    reset(&mut repo).await;

    let err = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", MISSING_TABLE, "/cache/orders"))
        .await
        .unwrap_err();
    assert!(matches!(err, StageCacheError::Persistence { .. }));
    assert!(!repo.handle().in_transaction());
    assert!(repo.get_cache_info("orders").await.unwrap().is_none());

    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new("orders", STAGE_TABLE, "/cache/orders"))
        .await
        .unwrap();
    let entry = repo.get_cache_info("orders").await.unwrap().unwrap();
    assert_eq!(entry.local_timestamp, Some(stamped));
}
