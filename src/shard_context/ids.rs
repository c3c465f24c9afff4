//! Lease renewal and monotonic task-id allocation.
//!
//! Each lease generation owns the id block
//! `[range_id << range_size_bits, (range_id + 1) << range_size_bits)`;
//! exhausting the block renews the lease in place. Ids therefore carry
//! their lease generation in the high bits, and ids from a later lease
//! always compare greater than ids from an earlier one.

use tracing::{debug, error, info};

use crate::error::ShardError;
use crate::namespace::NamespaceEntry;
use crate::persistence::UpdateShardRequest;
use crate::task::{Task, TaskSet, EMPTY_VERSION};

use super::{ShardContext, ShardState};

impl ShardContext {
    /// Hand out the next monotonic task id, renewing the lease if the
    /// current block is exhausted.
    pub async fn generate_transfer_task_id(&self) -> Result<i64, ShardError> {
        let mut st = self.write_lock().await;
        self.generate_transfer_task_id_locked(&mut st).await
    }

    /// Batch variant of [`generate_transfer_task_id`](Self::generate_transfer_task_id).
    pub async fn generate_transfer_task_ids(
        &self,
        count: usize,
    ) -> Result<Vec<i64>, ShardError> {
        let mut st = self.write_lock().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.generate_transfer_task_id_locked(&mut st).await?);
        }
        Ok(ids)
    }

    /// Highest task id covered by a completed persistence write. Task-read
    /// cursors must not advance past this.
    pub async fn transfer_max_read_level(&self) -> i64 {
        self.read_lock().await.transfer_max_read_level
    }

    pub(crate) async fn generate_transfer_task_id_locked(
        &self,
        st: &mut ShardState,
    ) -> Result<i64, ShardError> {
        self.update_range_if_needed_locked(st).await?;
        let task_id = st.transfer_sequence_number;
        st.transfer_sequence_number += 1;
        Ok(task_id)
    }

    async fn update_range_if_needed_locked(
        &self,
        st: &mut ShardState,
    ) -> Result<(), ShardError> {
        if st.transfer_sequence_number < st.max_transfer_sequence_number {
            return Ok(());
        }
        self.renew_range_locked(st, false).await
    }

    /// Advance the lease: conditional `range_id + 1` update on the shard
    /// record, then install the new id block. `stealing` renewals (driven
    /// by acquisition) also bump the stolen-since-renew counter.
    pub(crate) async fn renew_range_locked(
        &self,
        st: &mut ShardState,
        stealing: bool,
    ) -> Result<(), ShardError> {
        let mut updated = st.info()?.clone();
        let previous_range_id = updated.range_id;
        updated.range_id += 1;
        if stealing {
            updated.stolen_since_renew += 1;
        }

        let result = self
            .shard_store
            .update_shard(UpdateShardRequest {
                shard_info: updated.clone(),
                previous_range_id,
            })
            .await;
        if let Err(err) = result {
            error!(
                shard_id = self.shard_id,
                range_id = updated.range_id,
                previous_range_id,
                error = %err,
                "shard: failed to renew range"
            );
            return Err(self.handle_store_error_locked(st, err));
        }

        info!(
            shard_id = self.shard_id,
            range_id = updated.range_id,
            previous_range_id,
            sequence_number = st.transfer_sequence_number,
            max_sequence_number = st.max_transfer_sequence_number,
            "shard: range renewed"
        );

        let bits = self.config.range_size_bits;
        st.transfer_sequence_number = updated.range_id << bits;
        st.max_transfer_sequence_number = (updated.range_id + 1) << bits;
        st.transfer_max_read_level = st.transfer_sequence_number - 1;
        st.shard_info = Some(updated);
        Ok(())
    }

    /// Publish the highest id consumed by a batch. Called after the store
    /// call returns, success or not: the ids are spent either way, and a
    /// conservatively high read level is sound for cursor advancement.
    pub(crate) fn update_max_read_level_locked(&self, st: &mut ShardState, read_level: i64) {
        if read_level > st.transfer_max_read_level {
            debug!(
                shard_id = self.shard_id,
                read_level, "shard: advancing max read level"
            );
            st.transfer_max_read_level = read_level;
        }
    }

    /// Assign ids to every task of a write, transfer-like queues first.
    pub(crate) async fn allocate_task_ids_locked(
        &self,
        st: &mut ShardState,
        namespace: &NamespaceEntry,
        workflow_id: &str,
        tasks: &mut TaskSet,
        max_allocated: &mut i64,
    ) -> Result<(), ShardError> {
        self.allocate_transfer_ids_locked(st, &mut tasks.transfer_tasks, max_allocated)
            .await?;
        self.allocate_transfer_ids_locked(st, &mut tasks.replication_tasks, max_allocated)
            .await?;
        self.allocate_transfer_ids_locked(st, &mut tasks.visibility_tasks, max_allocated)
            .await?;
        // Timer ids must come last: queue consumers assume a closed
        // workflow's delete-timer id exceeds its close-transfer id.
        self.allocate_timer_ids_locked(st, namespace, workflow_id, &mut tasks.timer_tasks, max_allocated)
            .await
    }

    async fn allocate_transfer_ids_locked(
        &self,
        st: &mut ShardState,
        tasks: &mut [Task],
        max_allocated: &mut i64,
    ) -> Result<(), ShardError> {
        for task in tasks {
            let id = self.generate_transfer_task_id_locked(st).await?;
            debug!(shard_id = self.shard_id, task_id = id, "shard: assigning task id");
            task.task_id = id;
            *max_allocated = id;
        }
        Ok(())
    }

    /// Assign ids to timer tasks, keeping each task's visibility time at or
    /// past the owning cluster's timer read cursor. A timer that would fire
    /// behind the cursor (clock skew, delayed write) is nudged one
    /// millisecond past it.
    async fn allocate_timer_ids_locked(
        &self,
        st: &mut ShardState,
        namespace: &NamespaceEntry,
        workflow_id: &str,
        tasks: &mut [Task],
        max_allocated: &mut i64,
    ) -> Result<(), ShardError> {
        let local_cluster = self.cluster_metadata.current_cluster_name();
        for task in tasks {
            // A versioned timer is cursored against the namespace's active
            // cluster; failover processing creates it as active there.
            let cluster = if task.version != EMPTY_VERSION {
                namespace.active_cluster_name.as_str()
            } else {
                local_cluster.as_str()
            };
            let read_cursor = st.timer_max_read_level.get(cluster).copied().unwrap_or(0);
            if task.visibility_time_ms < read_cursor {
                debug!(
                    shard_id = self.shard_id,
                    namespace_id = %namespace.id,
                    workflow_id,
                    visibility_time_ms = task.visibility_time_ms,
                    cursor_ms = read_cursor,
                    "shard: timer visibility time behind read cursor, nudging forward"
                );
                task.visibility_time_ms = read_cursor + 1;
            }

            let id = self.generate_transfer_task_id_locked(st).await?;
            task.task_id = id;
            *max_allocated = id;
            debug!(
                shard_id = self.shard_id,
                task_id = id,
                visibility_time_ms = task.visibility_time_ms,
                "shard: assigning timer task id"
            );
        }
        Ok(())
    }
}
