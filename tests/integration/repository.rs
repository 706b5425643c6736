//! Repository scenarios against the in-process store

use stagecache::model::CacheEntryUpdate;
use stagecache::store::MemoryStore;
use stagecache::CacheInfoRepository;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::sleep;

const HOLD: Duration = Duration::from_millis(200);

/// Hold an exclusive lock on `table` for [`HOLD`], then report the store
/// time just before releasing it
async fn spawn_table_writer(
    store: &MemoryStore,
    table: &'static str,
) -> oneshot::Receiver<chrono::DateTime<chrono::Utc>> {
    let (locked_tx, locked_rx) = oneshot::channel();
    let (released_tx, released_rx) = oneshot::channel();
    let store = store.clone();

    tokio::spawn(async move {
        let lock = store.lock_table(table).await;
        let _ = locked_tx.send(());
        sleep(HOLD).await;
        let released_at = store.now().await;
        lock.release();
        let _ = released_tx.send(released_at);
    });

    locked_rx.await.unwrap();
    released_rx
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_waits_for_table_writer() {
    let store = MemoryStore::new();
    let released = spawn_table_writer(&store, "__stage_orders").await;

    let mut repo = CacheInfoRepository::new(store.handle());
    let started = Instant::now();
    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new(
            "orders",
            "__stage_orders",
            "/cache/orders",
        ))
        .await
        .unwrap();

    assert!(started.elapsed() >= HOLD / 2);
    let released_at = released.await.unwrap();
    assert!(stamped > released_at);

    let entry = repo.get_cache_info("orders").await.unwrap().unwrap();
    assert_eq!(entry.local_timestamp, Some(stamped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_ignores_writers_of_other_tables() {
    let store = MemoryStore::new();
    let released = spawn_table_writer(&store, "__stage_customers").await;

    let mut repo = CacheInfoRepository::new(store.handle());
    let stamped = repo
        .put_cache_info(&CacheEntryUpdate::new(
            "orders",
            "__stage_orders",
            "/cache/orders",
        ))
        .await
        .unwrap();

    let released_at = released.await.unwrap();
    assert!(stamped < released_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_for_one_id_get_distinct_stamps() {
    let store = MemoryStore::new();

    let mut tasks = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut repo = CacheInfoRepository::new(store.handle());
            repo.put_cache_info(&CacheEntryUpdate::new(
                "orders",
                "__stage_orders",
                format!("/cache/orders/{n}"),
            ))
            .await
            .unwrap()
        }));
    }

    let mut stamps = Vec::new();
    for task in tasks {
        stamps.push(task.await.unwrap());
    }
    let latest = *stamps.iter().max().unwrap();
    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), 8);

    let mut repo = CacheInfoRepository::new(store.handle());
    let entry = repo.get_cache_info("orders").await.unwrap().unwrap();
    assert_eq!(entry.local_timestamp, Some(latest));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_winner_per_contended_table() {
    let store = MemoryStore::new();

    let mut tasks = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut repo = CacheInfoRepository::new(store.handle());
            repo.try_lock(&format!("exec-{n}"), "loader", "__stage_orders")
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let mut repo = CacheInfoRepository::new(store.handle());
    let held = repo.list_locks(None).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].table_name, "__stage_orders");
}

#[tokio::test]
async fn crash_recovery_releases_orphaned_locks() {
    let store = MemoryStore::new();

    {
        let mut crashed = CacheInfoRepository::new(store.handle());
        assert!(crashed.try_lock("exec-1", "loader-a", "T1").await.unwrap());
        assert!(crashed.try_lock("exec-2", "loader-b", "T2").await.unwrap());
    }

    let mut restarted = CacheInfoRepository::new(store.handle());
    assert!(!restarted.try_lock("exec-3", "loader-a", "T1").await.unwrap());

    assert_eq!(restarted.release_all_lock().await.unwrap(), 2);
    assert!(restarted.try_lock("exec-3", "loader-a", "T1").await.unwrap());
    assert!(restarted.try_lock("exec-3", "loader-b", "T2").await.unwrap());
    assert_eq!(restarted.release_lock("exec-3").await.unwrap(), 2);
}
