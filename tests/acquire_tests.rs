//! The acquisition loop: retries, terminal failures, engine lifecycle, and
//! the blocking engine accessor.


use std::sync::atomic::Ordering;
use std::time::Duration;

use test_helpers::*;
use weft::error::{ShardError, StoreError};
use weft::shard_context::ShardPhase;

#[tokio::test(start_paused = true)]
async fn acquisition_retries_through_transient_load_failures() {
    let builder = TestShardBuilder::new();
    let shard = builder.build();
    shard
        .shard_store
        .get_failures
        .push_n(StoreError::Unavailable("booting".into()), 2);

    shard.context.start().await;
    tokio::time::timeout(Duration::from_secs(30), shard.context.wait_for_engine())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(shard.context.phase().await, ShardPhase::Acquired);
    assert_eq!(shard.shard_store.stored_info().range_id, 6);
}

#[tokio::test(start_paused = true)]
async fn acquisition_retries_through_transient_renew_failures() {
    let shard = TestShardBuilder::new().build();
    shard
        .shard_store
        .update_failures
        .push_n(StoreError::Timeout("slow".into()), 3);

    shard.context.start().await;
    tokio::time::timeout(Duration::from_secs(30), shard.context.wait_for_engine())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(shard.context.phase().await, ShardPhase::Acquired);
    // Three failed attempts plus the successful one.
    assert_eq!(shard.shard_store.update_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn ownership_lost_during_acquisition_stops_the_shard() {
    let mut shard = TestShardBuilder::new().build();
    shard.shard_store.update_failures.always(StoreError::ShardOwnershipLost {
        owner: "thief-host:7234".into(),
    });

    shard.context.start().await;
    assert_eq!(shard.wait_closed().await, SHARD_ID);
    assert!(!shard.context.is_valid().await);
    // The lease was never held, so no engine was ever built.
    assert_eq!(shard.factory.created(), 0);

    shard.context.stop().await;
    assert_eq!(shard.context.phase().await, ShardPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn spending_the_acquisition_budget_stops_the_shard() {
    let mut shard = TestShardBuilder::new()
        .config(|c| {
            c.acquire_initial_backoff_ms = 10;
            c.acquire_max_backoff_ms = 50;
            c.acquire_budget_ms = 500;
        })
        .build();
    shard
        .shard_store
        .update_failures
        .always(StoreError::Unavailable("partitioned".into()));

    shard.context.start().await;
    assert_eq!(shard.wait_closed().await, SHARD_ID);
    assert_eq!(
        shard.context.engine().await.unwrap_err(),
        ShardError::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn engine_is_started_once_and_stopped_on_shutdown() {
    let shard = TestShardBuilder::new().start().await;
    let engine = shard.factory.engine();
    assert!(engine.started.load(Ordering::SeqCst));
    assert!(!engine.stopped.load(Ordering::SeqCst));
    assert_eq!(shard.factory.created(), 1);

    shard.context.stop().await;
    assert!(engine.stopped.load(Ordering::SeqCst));
    assert_eq!(shard.context.phase().await, ShardPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn engine_accessor_reports_closed_after_stop() {
    let shard = TestShardBuilder::new().start().await;
    shard.context.stop().await;
    assert_eq!(
        shard.context.engine().await.unwrap_err(),
        ShardError::Closed
    );
    assert_eq!(
        shard.context.wait_for_engine().await.unwrap_err(),
        ShardError::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn engine_accessor_waits_through_the_acquiring_window() {
    let shard = TestShardBuilder::new().build();
    shard
        .shard_store
        .get_failures
        .push_n(StoreError::Unavailable("booting".into()), 4);

    shard.context.start().await;
    // The accessor polls on StatusUnknown until acquisition lands.
    let engine = tokio::time::timeout(Duration::from_secs(60), shard.context.wait_for_engine())
        .await
        .expect("accessor should resolve once the lease is held")
        .unwrap();
    engine.notify_new_transfer_tasks(&[]);
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_goes_straight_to_stopped() {
    let shard = TestShardBuilder::new().build();
    assert_eq!(shard.context.phase().await, ShardPhase::Initialized);

    shard.context.stop().await;
    assert_eq!(shard.context.phase().await, ShardPhase::Stopped);
    assert_eq!(shard.factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn next_lease_after_failure_is_strictly_larger() {
    let shard = TestShardBuilder::new().start().await;
    let first = shard.shard_store.stored_info().range_id;

    shard
        .execution_store
        .add_tasks_failures
        .push(StoreError::Timeout("lost in flight".into()));
    let request = add_tasks_request(weft::task::TaskSet {
        transfer_tasks: vec![transfer_task()],
        ..weft::task::TaskSet::default()
    });
    shard.context.add_tasks(request).await.unwrap_err();

    tokio::time::timeout(Duration::from_secs(30), shard.context.wait_for_engine())
        .await
        .unwrap()
        .unwrap();
    assert!(shard.shard_store.stored_info().range_id > first);
}
