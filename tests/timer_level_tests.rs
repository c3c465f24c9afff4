//! Timer read cursors, the clock-skew nudge, and remote cluster clocks.


use test_helpers::*;
use weft::task::TaskSet;

#[tokio::test(start_paused = true)]
async fn cursors_are_seeded_from_persisted_ack_levels() {
    let shard = TestShardBuilder::new()
        .shard_info(|info| {
            info.timer_ack_level_ms = T0 - 60_000;
            info.cluster_timer_ack_level_ms
                .insert(REMOTE_CLUSTER.to_string(), T0 - 120_000);
        })
        .start()
        .await;

    assert_eq!(shard.context.timer_max_read_level(LOCAL_CLUSTER).await, T0 - 60_000);
    assert_eq!(
        shard.context.timer_max_read_level(REMOTE_CLUSTER).await,
        T0 - 120_000
    );
    // Disabled clusters get no cursor.
    assert_eq!(shard.context.timer_max_read_level("disabled-dc").await, 0);
}

#[tokio::test(start_paused = true)]
async fn timer_behind_the_cursor_is_nudged_one_millisecond_past_it() {
    let t0 = T0 - 60_000;
    let shard = TestShardBuilder::new()
        .shard_info(|info| info.timer_ack_level_ms = t0)
        .start()
        .await;

    let request = add_tasks_request(TaskSet {
        transfer_tasks: vec![transfer_task()],
        timer_tasks: vec![timer_task(t0 - 5, 0)],
        ..TaskSet::default()
    });
    shard.context.add_tasks(request).await.unwrap();

    let seen = shard.execution_store.last_add_tasks().unwrap();
    let timer = &seen.tasks.timer_tasks[0];
    assert_eq!(timer.visibility_time_ms, t0 + 1);
    // The timer id follows the transfer id of the same batch.
    assert!(timer.task_id > seen.tasks.transfer_tasks[0].task_id);
}

#[tokio::test(start_paused = true)]
async fn timer_at_or_past_the_cursor_is_left_alone() {
    let t0 = T0 - 60_000;
    let shard = TestShardBuilder::new()
        .shard_info(|info| info.timer_ack_level_ms = t0)
        .start()
        .await;

    let request = add_tasks_request(TaskSet {
        timer_tasks: vec![timer_task(t0, 0), timer_task(t0 + 500, 0)],
        ..TaskSet::default()
    });
    shard.context.add_tasks(request).await.unwrap();

    let seen = shard.execution_store.last_add_tasks().unwrap();
    assert_eq!(seen.tasks.timer_tasks[0].visibility_time_ms, t0);
    assert_eq!(seen.tasks.timer_tasks[1].visibility_time_ms, t0 + 500);
}

#[tokio::test(start_paused = true)]
async fn versioned_timer_is_cursored_against_the_namespace_active_cluster() {
    // The namespace is active on the local cluster, so a versioned timer
    // still uses the local cursor here; the remote cursor is far ahead and
    // must not apply.
    let t0 = T0 - 60_000;
    let shard = TestShardBuilder::new()
        .shard_info(|info| {
            info.timer_ack_level_ms = t0;
            info.cluster_timer_ack_level_ms
                .insert(REMOTE_CLUSTER.to_string(), T0 + 600_000);
        })
        .start()
        .await;

    let request = add_tasks_request(TaskSet {
        timer_tasks: vec![timer_task(t0 + 100, 7)],
        ..TaskSet::default()
    });
    shard.context.add_tasks(request).await.unwrap();

    let seen = shard.execution_store.last_add_tasks().unwrap();
    assert_eq!(seen.tasks.timer_tasks[0].visibility_time_ms, t0 + 100);
}

#[tokio::test(start_paused = true)]
async fn update_timer_max_read_level_advances_past_the_clock() {
    let shard = TestShardBuilder::new().start().await;
    let shift = shard.context.config().timer_processor_max_time_shift_ms;

    let level = shard.context.update_timer_max_read_level(LOCAL_CLUSTER).await;
    assert_eq!(level, T0 + shift);
    assert_eq!(shard.context.timer_max_read_level(LOCAL_CLUSTER).await, T0 + shift);

    // An empty cluster name means the local cluster.
    shard.time.advance(2_500);
    let level = shard.context.update_timer_max_read_level("").await;
    assert_eq!(level, T0 + 2_500 + shift);
    assert_eq!(shard.context.timer_max_read_level("").await, T0 + 2_500 + shift);
    assert_eq!(
        shard.context.timer_max_read_level(LOCAL_CLUSTER).await,
        T0 + 2_500 + shift
    );
}

#[tokio::test(start_paused = true)]
async fn update_timer_max_read_level_for_a_remote_cluster_uses_its_clock() {
    let shard = TestShardBuilder::new()
        .shard_info(|info| {
            info.cluster_timer_ack_level_ms
                .insert(REMOTE_CLUSTER.to_string(), T0 - 120_000);
        })
        .start()
        .await;
    let shift = shard.context.config().timer_processor_max_time_shift_ms;

    shard.context.set_current_time(REMOTE_CLUSTER, T0 - 30_000).await;
    let level = shard.context.update_timer_max_read_level(REMOTE_CLUSTER).await;
    assert_eq!(level, T0 - 30_000 + shift);
}

#[tokio::test(start_paused = true)]
async fn remote_clock_is_monotonic() {
    let shard = TestShardBuilder::new().start().await;

    shard.context.set_current_time(REMOTE_CLUSTER, T0 + 10).await;
    assert_eq!(shard.context.current_time(REMOTE_CLUSTER).await, T0 + 10);

    // Going backwards is ignored.
    shard.context.set_current_time(REMOTE_CLUSTER, T0 - 50).await;
    assert_eq!(shard.context.current_time(REMOTE_CLUSTER).await, T0 + 10);

    shard.context.set_current_time(REMOTE_CLUSTER, T0 + 20).await;
    assert_eq!(shard.context.current_time(REMOTE_CLUSTER).await, T0 + 20);
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "cannot set current time for the local cluster")]
async fn setting_the_local_clock_is_a_programming_error() {
    let shard = TestShardBuilder::new().start().await;
    shard.context.set_current_time(LOCAL_CLUSTER, T0 + 1).await;
}

#[tokio::test(start_paused = true)]
async fn local_current_time_is_the_wall_clock() {
    let shard = TestShardBuilder::new().start().await;
    assert_eq!(shard.context.current_time(LOCAL_CLUSTER).await, T0);
    shard.time.advance(5_000);
    assert_eq!(shard.context.current_time(LOCAL_CLUSTER).await, T0 + 5_000);
}
