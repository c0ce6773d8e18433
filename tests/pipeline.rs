mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use wp_cache::error::CacheError;
use wp_cache::model::Cat;
use wp_cache::prelude::*;

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let waited = tokio::time::timeout(SETTLE, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_then_read() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    assert_eq!(cache.start().await.unwrap(), CacheStatus::Running);

    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    drained(&log).await;

    let cat = cache.read(&"c1".to_string()).expect("c1 is cached");
    assert_eq!(cat.name, "Tom");

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_replaces_snapshot() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    cache.start().await.unwrap();

    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    cache.update(Cat::new("c1", "Tomcat")).await.unwrap();
    drained(&log).await;

    assert_eq!(cache.read(&"c1".to_string()).unwrap().name, "Tomcat");
    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_removes_entry() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    cache.start().await.unwrap();

    cache.write(Cat::new("c2", "Felix").vaccinated(true)).await.unwrap();
    cache.delete("c2".to_string()).await.unwrap();
    drained(&log).await;

    assert!(cache.read(&"c2".to_string()).is_none());
    // Deleting something never cached is harmless.
    cache.delete("c3".to_string()).await.unwrap();
    drained(&log).await;
    assert!(cache.state().is_empty());

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_producer_converges() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    cache.start().await.unwrap();
    let id = "c7".to_string();

    cache.write(Cat::new("c7", "Kitty")).await.unwrap();
    cache.update(Cat::new("c7", "Kitty").vaccinated(true)).await.unwrap();
    cache.delete(id.clone()).await.unwrap();
    cache.write(Cat::new("c7", "Kitty II")).await.unwrap();
    cache.update(Cat::new("c7", "Kitty III")).await.unwrap();
    drained(&log).await;

    let cat = cache.read(&id).unwrap();
    assert_eq!(cat.name, "Kitty III");
    assert!(!cat.vaccinated);

    cache.delete(id.clone()).await.unwrap();
    drained(&log).await;
    assert!(cache.read(&id).is_none());

    cache.shutdown().await;
}

#[tokio::test]
async fn unknown_id_misses() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    assert!(cache.read(&"nobody".to_string()).is_none());
    assert_eq!(cache.status(), CacheStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_workers() {
    let log = Arc::new(MemoryLog::new());
    let observer = CountingObserver::new();
    let cache = Arc::new(
        StreamCache::<MemoryLog, Cat>::builder()
            .log(log.clone())
            .stream_name(STREAM)
            .group_name(GROUP)
            .workers(3)
            .observer(observer.clone())
            .build()
            .unwrap(),
    );
    cache.start().await.unwrap();

    let mut producers = tokio::task::JoinSet::new();
    for producer in 0..10 {
        let cache = cache.clone();
        producers.spawn(async move {
            for n in 0..10 {
                let id = format!("cat-{producer}-{n}");
                cache.write(Cat::new(id.clone(), format!("Cat {id}"))).await.unwrap();
            }
        });
    }
    while let Some(joined) = producers.join_next().await {
        joined.unwrap();
    }
    drained(&log).await;

    assert_eq!(log.len(STREAM), 100);
    assert_eq!(cache.state().len(), 100);
    for producer in 0..10 {
        for n in 0..10 {
            let id = format!("cat-{producer}-{n}");
            assert_eq!(cache.read(&id).unwrap().name, format!("Cat {id}"));
        }
    }

    // Every position applied exactly once and delivered exactly once.
    let applied = observer.applied();
    assert_eq!(applied.len(), 100);
    assert!(applied.values().all(|count| *count == 1));
    for position in applied.keys() {
        assert_eq!(log.delivery_count(STREAM, GROUP, *position), 1);
    }
    assert_eq!(log.acked(STREAM, GROUP), 100);

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poison_record_does_not_block() {
    let log = Arc::new(MemoryLog::new());
    let observer = CountingObserver::new();
    let cache = StreamCache::<MemoryLog, Cat>::builder()
        .log(log.clone())
        .stream_name(STREAM)
        .group_name(GROUP)
        .workers(2)
        .observer(observer.clone())
        .build()
        .unwrap();
    cache.start().await.unwrap();

    for n in 0..9 {
        if n == 4 {
            log.append(
                STREAM,
                LogRecord::new(b"{not json".to_vec()).with_meta(METHOD_FIELD, "set"),
            )
            .await
            .unwrap();
        }
        cache.write(Cat::new(format!("c{n}"), format!("Cat {n}"))).await.unwrap();
    }
    drained(&log).await;

    assert_eq!(log.cursor(STREAM, GROUP), Some(10));
    assert!(log.pending(STREAM, GROUP).is_empty());
    assert_eq!(log.acked(STREAM, GROUP), 10);
    assert_eq!(observer.poison().len(), 1);
    assert_eq!(cache.state().len(), 9);
    for n in 0..9 {
        assert!(cache.read(&format!("c{n}")).is_some());
    }

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_is_poison() {
    let log = Arc::new(MemoryLog::new());
    let observer = CountingObserver::new();
    let cache = StreamCache::<MemoryLog, Cat>::builder()
        .log(log.clone())
        .workers(1)
        .observer(observer.clone())
        .build()
        .unwrap();
    cache.start().await.unwrap();

    log.append(
        cache.stream_name(),
        LogRecord::new(br#"{"id":"c1","name":"Tom"}"#.to_vec()).with_meta(METHOD_FIELD, "upsert"),
    )
    .await
    .unwrap();
    log.append(cache.stream_name(), LogRecord::new(br#"{"id":"c1"}"#.to_vec()))
        .await
        .unwrap();
    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    tokio::time::timeout(SETTLE, log.wait_drained(cache.stream_name(), cache.group_name()))
        .await
        .unwrap();

    assert_eq!(observer.poison().len(), 2);
    assert_eq!(cache.read(&"c1".to_string()).unwrap().name, "Tom");

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_before_group_are_never_seen() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 2);

    cache.write(Cat::new("early", "Early Bird")).await.unwrap();
    cache.start().await.unwrap();
    assert_eq!(log.cursor(STREAM, GROUP), Some(1));

    cache.write(Cat::new("late", "Late Riser")).await.unwrap();
    drained(&log).await;

    assert!(cache.read(&"early".to_string()).is_none());
    assert!(cache.read(&"late".to_string()).is_some());
    assert_eq!(log.delivery_count(STREAM, GROUP, LogPosition::new(0, 1)), 0);

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn append_failure_is_reported() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 1);
    cache.start().await.unwrap();

    log.set_unavailable(true);
    let err = cache.write(Cat::new("c1", "Tom")).await.unwrap_err();
    assert!(matches!(err, CacheError::Log(LogError::Unavailable(_))), "got {err:?}");
    assert_eq!(log.len(STREAM), 0);

    log.set_unavailable(false);
    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    drained(&log).await;
    assert!(cache.read(&"c1".to_string()).is_some());

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_ack_leaves_position_pending() {
    let log = Arc::new(MemoryLog::new());
    let observer = CountingObserver::new();
    let cache = StreamCache::<MemoryLog, Cat>::builder()
        .log(log.clone())
        .stream_name(STREAM)
        .group_name(GROUP)
        .workers(1)
        .observer(observer.clone())
        .build()
        .unwrap();
    cache.start().await.unwrap();

    log.set_fail_acks(true);
    let position = cache.write(Cat::new("c1", "Tom")).await.unwrap();
    eventually("the ack to fail", || observer.errors() == 1).await;
    log.set_fail_acks(false);
    assert_eq!(observer.applied_total(), 1);

    // Applied, but held by the consumer that claimed it.
    assert!(cache.read(&"c1".to_string()).is_some());
    assert_eq!(log.pending(STREAM, GROUP), vec![(position, "worker-0".to_string())]);
    assert!(!log.is_drained(STREAM, GROUP));

    // Later work is unaffected.
    cache.write(Cat::new("c2", "Felix")).await.unwrap();
    eventually("the second command", || cache.read(&"c2".to_string()).is_some()).await;
    eventually("the second ack", || log.acked(STREAM, GROUP) == 1).await;
    assert_eq!(log.pending(STREAM, GROUP).len(), 1);

    // A recovering consumer gets the stuck position handed over again.
    let reclaimed = log.reclaim(STREAM, GROUP, "worker-0", "worker-9").unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].position, position);
    assert_eq!(log.delivery_count(STREAM, GROUP, position), 2);
    log.ack(STREAM, GROUP, position).await.unwrap();
    assert!(log.is_drained(STREAM, GROUP));

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finishes_claimed_work() {
    let log = Arc::new(MemoryLog::new());
    let observer = CountingObserver::slow(Duration::from_millis(200));
    let cache = StreamCache::<MemoryLog, Cat>::builder()
        .log(log.clone())
        .stream_name(STREAM)
        .group_name(GROUP)
        .workers(1)
        .observer(observer.clone())
        .build()
        .unwrap();
    cache.start().await.unwrap();

    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    eventually("the command to be claimed", || !log.pending(STREAM, GROUP).is_empty()).await;

    tokio::time::timeout(SETTLE, cache.shutdown()).await.expect("shutdown completes");

    assert_eq!(cache.status(), CacheStatus::Stopped);
    assert_eq!(observer.applied_total(), 1);
    assert!(log.is_drained(STREAM, GROUP));
    assert_eq!(cache.read(&"c1".to_string()).unwrap().name, "Tom");

    // Nothing consumes after shutdown.
    cache.write(Cat::new("c2", "Felix")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.read(&"c2".to_string()).is_none());
    assert_eq!(log.cursor(STREAM, GROUP), Some(1));

    // A restart picks up where the group left off.
    assert_eq!(cache.start().await.unwrap(), CacheStatus::Running);
    drained(&log).await;
    assert!(cache.read(&"c2".to_string()).is_some());

    cache.shutdown().await;
}

#[tokio::test]
async fn cold_when_group_cannot_be_created() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 2);

    log.set_unavailable(true);
    assert_eq!(cache.start().await.unwrap(), CacheStatus::Cold);
    assert_eq!(cache.status(), CacheStatus::Cold);

    log.set_unavailable(false);
    // Stays cold: no workers, every read misses.
    assert_eq!(cache.start().await.unwrap(), CacheStatus::Cold);
    assert!(!log.has_group(STREAM, GROUP));
    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.read(&"c1".to_string()).is_none());

    cache.shutdown().await;
    assert_eq!(cache.status(), CacheStatus::Cold);
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 0);
    assert!(matches!(cache.start().await, Err(CacheError::Config(_))));
    assert_eq!(cache.status(), CacheStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_idempotent() {
    let log = Arc::new(MemoryLog::new());
    let cache = cache_with(&log, 2);

    assert_eq!(cache.start().await.unwrap(), CacheStatus::Running);
    assert_eq!(cache.start().await.unwrap(), CacheStatus::Running);

    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    drained(&log).await;
    assert_eq!(log.acked(STREAM, GROUP), 1);

    cache.shutdown().await;
    // Second shutdown has nothing to stop.
    cache.shutdown().await;
    assert_eq!(cache.status(), CacheStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_can_be_shared() {
    let log = Arc::new(MemoryLog::new());
    let state = Arc::new(MaterializedState::<Cat>::new());
    let cache = StreamCache::<MemoryLog, Cat>::builder()
        .log(log.clone())
        .stream_name(STREAM)
        .group_name(GROUP)
        .workers(1)
        .state(state.clone())
        .build()
        .unwrap();
    cache.start().await.unwrap();

    cache.write(Cat::new("c1", "Tom")).await.unwrap();
    drained(&log).await;
    assert!(state.contains(&"c1".to_string()));

    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn built_from_config() {
    let log = Arc::new(MemoryLog::new());
    let config = CacheConfig::from_args([
        "wp-cache",
        "--stream-name",
        "dogs",
        "--group-name",
        "consumers",
        "--workers",
        "2",
    ])
    .unwrap();
    let cache = StreamCache::<MemoryLog, Cat>::from_config(log.clone(), &config).unwrap();
    assert_eq!(cache.stream_name(), "dogs");
    assert_eq!(cache.workers(), 2);

    cache.start().await.unwrap();
    cache.write(Cat::new("d1", "Rex")).await.unwrap();
    tokio::time::timeout(SETTLE, log.wait_drained("dogs", "consumers"))
        .await
        .unwrap();
    assert!(cache.read(&"d1".to_string()).is_some());

    cache.shutdown().await;
}
