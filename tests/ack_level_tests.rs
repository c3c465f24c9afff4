//! Ack-level registry: per-key defaults, idempotent setters, the
//! rate-limited flush, and failover-level bookkeeping.


use test_helpers::*;
use weft::shard_info::{TimerFailoverLevel, TransferFailoverLevel, EMPTY_QUEUE_MESSAGE_ID};

#[tokio::test(start_paused = true)]
async fn setters_flush_and_zero_the_stolen_counter() {
    let shard = TestShardBuilder::new().start().await;
    // Acquisition stole the lease once.
    assert_eq!(shard.shard_store.stored_info().stolen_since_renew, 1);

    shard.context.update_transfer_ack_level(6_291_460).await.unwrap();
    assert_eq!(shard.context.transfer_ack_level().await.unwrap(), 6_291_460);

    let stored = shard.shard_store.stored_info();
    assert_eq!(stored.transfer_ack_level, 6_291_460);
    assert_eq!(stored.stolen_since_renew, 0);
    assert_eq!(stored.update_time_ms, T0);
}

#[tokio::test(start_paused = true)]
async fn flushes_are_rate_limited_but_reads_see_the_latest_value() {
    let shard = TestShardBuilder::new().start().await;
    let baseline = shard.shard_store.update_count();

    shard.context.update_transfer_ack_level(10).await.unwrap();
    assert_eq!(shard.shard_store.update_count(), baseline + 1);

    // Within the minimum interval: held in memory, no store write.
    shard.context.update_transfer_ack_level(20).await.unwrap();
    shard.context.update_replicator_ack_level(5).await.unwrap();
    assert_eq!(shard.shard_store.update_count(), baseline + 1);
    assert_eq!(shard.context.transfer_ack_level().await.unwrap(), 20);
    assert_eq!(shard.context.replicator_ack_level().await.unwrap(), 5);

    // Past the interval: the next mutation writes the consolidated state.
    shard.time.advance(shard.context.config().shard_update_min_interval_ms);
    shard.context.update_visibility_ack_level(7).await.unwrap();
    assert_eq!(shard.shard_store.update_count(), baseline + 2);
    let stored = shard.shard_store.stored_info();
    assert_eq!(stored.transfer_ack_level, 20);
    assert_eq!(stored.replication_ack_level, 5);
    assert_eq!(stored.visibility_ack_level, 7);
}

#[tokio::test(start_paused = true)]
async fn setters_are_idempotent_in_memory() {
    let shard = TestShardBuilder::new().start().await;
    shard.context.update_transfer_ack_level(42).await.unwrap();
    shard.context.update_transfer_ack_level(42).await.unwrap();
    shard.context.update_transfer_ack_level(42).await.unwrap();
    assert_eq!(shard.context.transfer_ack_level().await.unwrap(), 42);
}

#[tokio::test(start_paused = true)]
async fn missing_cluster_keys_fall_back_to_documented_defaults() {
    let shard = TestShardBuilder::new()
        .shard_info(|info| {
            info.transfer_ack_level = 123;
            info.timer_ack_level_ms = T0 - 5_000;
        })
        .start()
        .await;

    // Unknown cluster keys default to the local queue's levels.
    assert_eq!(
        shard.context.transfer_cluster_ack_level("new-dc").await.unwrap(),
        123
    );
    assert_eq!(
        shard.context.timer_cluster_ack_level("new-dc").await.unwrap(),
        T0 - 5_000
    );
    // Replication levels for a never-seen cluster start at the
    // empty-queue sentinel.
    assert_eq!(
        shard.context.cluster_replication_level("new-dc").await.unwrap(),
        EMPTY_QUEUE_MESSAGE_ID
    );
    assert_eq!(
        shard.context.replicator_dlq_ack_level("new-dc").await.unwrap(),
        EMPTY_QUEUE_MESSAGE_ID
    );
}

#[tokio::test(start_paused = true)]
async fn cluster_level_updates_round_trip() {
    let shard = TestShardBuilder::new().start().await;

    shard
        .context
        .update_transfer_cluster_ack_level(REMOTE_CLUSTER, 88)
        .await
        .unwrap();
    assert_eq!(
        shard
            .context
            .transfer_cluster_ack_level(REMOTE_CLUSTER)
            .await
            .unwrap(),
        88
    );

    shard
        .context
        .update_timer_cluster_ack_level(REMOTE_CLUSTER, T0 + 30_000)
        .await
        .unwrap();
    assert_eq!(
        shard
            .context
            .timer_cluster_ack_level(REMOTE_CLUSTER)
            .await
            .unwrap(),
        T0 + 30_000
    );

    shard
        .context
        .update_replicator_dlq_ack_level(REMOTE_CLUSTER, 4)
        .await
        .unwrap();
    assert_eq!(
        shard
            .context
            .replicator_dlq_ack_level(REMOTE_CLUSTER)
            .await
            .unwrap(),
        4
    );
}

#[tokio::test(start_paused = true)]
async fn replication_level_update_refreshes_remote_ack_info() {
    let shard = TestShardBuilder::new().start().await;

    shard
        .context
        .update_cluster_replication_level(REMOTE_CLUSTER, 900, T0 + 1)
        .await
        .unwrap();
    assert_eq!(
        shard
            .context
            .cluster_replication_level(REMOTE_CLUSTER)
            .await
            .unwrap(),
        900
    );

    let all = shard.context.remote_cluster_ack_info(&[]).await;
    let info = &all[REMOTE_CLUSTER];
    assert_eq!(info.acked_task_id, 900);
    assert_eq!(info.acked_task_visibility_time_ms, T0 + 1);

    // Filtered queries only report the clusters asked for.
    let filtered = shard
        .context
        .remote_cluster_ack_info(&["unknown-dc".to_string()])
        .await;
    assert!(filtered.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failover_levels_round_trip_and_delete_is_tolerant() {
    let shard = TestShardBuilder::new().start().await;

    let transfer_level = TransferFailoverLevel {
        start_time_ms: T0 - 90_000,
        min_level: 1,
        current_level: 2,
        max_level: 3,
        namespace_ids: vec![NAMESPACE_ID.to_string()],
    };
    shard
        .context
        .update_transfer_failover_level("f1", transfer_level.clone())
        .await
        .unwrap();
    let all = shard.context.all_transfer_failover_levels().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["f1"], transfer_level);

    shard.context.delete_transfer_failover_level("f1").await.unwrap();
    assert!(shard
        .context
        .all_transfer_failover_levels()
        .await
        .unwrap()
        .is_empty());

    // Deleting an unknown id is a no-op, not an error.
    shard.context.delete_transfer_failover_level("missing").await.unwrap();

    let timer_level = TimerFailoverLevel {
        start_time_ms: T0 - 10_000,
        min_level_ms: T0 - 60_000,
        current_level_ms: T0 - 30_000,
        max_level_ms: T0,
        namespace_ids: vec![NAMESPACE_ID.to_string()],
    };
    shard
        .context
        .update_timer_failover_level("t1", timer_level.clone())
        .await
        .unwrap();
    assert_eq!(
        shard.context.all_timer_failover_levels().await.unwrap()["t1"],
        timer_level
    );
    shard.context.delete_timer_failover_level("t1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn namespace_notification_version_round_trips() {
    let shard = TestShardBuilder::new().start().await;
    assert_eq!(
        shard.context.namespace_notification_version().await.unwrap(),
        0
    );
    shard
        .context
        .update_namespace_notification_version(41)
        .await
        .unwrap();
    assert_eq!(
        shard.context.namespace_notification_version().await.unwrap(),
        41
    );
}

#[tokio::test(start_paused = true)]
async fn last_updated_time_tracks_successful_flushes() {
    let shard = TestShardBuilder::new().start().await;
    assert_eq!(shard.context.last_updated_time().await, 0);

    shard.context.update_transfer_ack_level(1).await.unwrap();
    assert_eq!(shard.context.last_updated_time().await, T0);
}
