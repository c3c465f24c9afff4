//! Ack-level registry: in-memory high-water-marks with a rate-limited
//! durable flush.
//!
//! Setters mutate the cached shard record, zero the stolen-since-renew
//! counter, and flush through `update_shard_info_locked`, which holds the
//! mutation in memory when the previous flush is younger than the
//! configured minimum interval. Reads always see the latest in-memory
//! value.

use std::collections::HashMap;

use tracing::warn;

use crate::error::ShardError;
use crate::persistence::UpdateShardRequest;
use crate::shard_info::{
    RemoteClusterInfo, TimerFailoverLevel, TransferFailoverLevel, EMPTY_QUEUE_MESSAGE_ID,
};

use super::{ShardContext, ShardState};

/// Snapshot of what a remote cluster has acknowledged replicating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAckInfo {
    pub acked_task_id: i64,
    pub acked_task_visibility_time_ms: i64,
}

impl ShardContext {
    pub async fn transfer_ack_level(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.transfer_ack_level)
    }

    pub async fn update_transfer_ack_level(
        &self,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.transfer_ack_level = ack_level;
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    /// Per-cluster transfer ack level; an unknown cluster (added after this
    /// record was written) defaults to the local queue's ack level.
    pub async fn transfer_cluster_ack_level(&self, cluster: &str) -> Result<i64, ShardError> {
        let st = self.read_lock().await;
        let info = st.info()?;
        Ok(info
            .cluster_transfer_ack_level
            .get(cluster)
            .copied()
            .unwrap_or(info.transfer_ack_level))
    }

    pub async fn update_transfer_cluster_ack_level(
        &self,
        cluster: &str,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.cluster_transfer_ack_level
            .insert(cluster.to_string(), ack_level);
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn visibility_ack_level(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.visibility_ack_level)
    }

    pub async fn update_visibility_ack_level(
        &self,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.visibility_ack_level = ack_level;
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn tiered_storage_ack_level(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.tiered_storage_ack_level)
    }

    pub async fn update_tiered_storage_ack_level(
        &self,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.tiered_storage_ack_level = ack_level;
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn replicator_ack_level(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.replication_ack_level)
    }

    pub async fn update_replicator_ack_level(
        &self,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.replication_ack_level = ack_level;
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    /// DLQ ack level for a source cluster; missing keys default to the
    /// empty-queue sentinel.
    pub async fn replicator_dlq_ack_level(&self, source_cluster: &str) -> Result<i64, ShardError> {
        let st = self.read_lock().await;
        Ok(st
            .info()?
            .replication_dlq_ack_level
            .get(source_cluster)
            .copied()
            .unwrap_or(EMPTY_QUEUE_MESSAGE_ID))
    }

    pub async fn update_replicator_dlq_ack_level(
        &self,
        source_cluster: &str,
        ack_level: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.replication_dlq_ack_level
            .insert(source_cluster.to_string(), ack_level);
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await?;
        self.metrics
            .set_replication_dlq_ack_level(&self.shard_label, source_cluster, ack_level);
        Ok(())
    }

    /// Replication progress of a remote cluster; a cluster never seen
    /// before starts from the empty-queue sentinel.
    pub async fn cluster_replication_level(&self, cluster: &str) -> Result<i64, ShardError> {
        let st = self.read_lock().await;
        Ok(st
            .info()?
            .cluster_replication_level
            .get(cluster)
            .copied()
            .unwrap_or(EMPTY_QUEUE_MESSAGE_ID))
    }

    pub async fn update_cluster_replication_level(
        &self,
        cluster: &str,
        acked_task_id: i64,
        acked_timestamp_ms: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.cluster_replication_level
            .insert(cluster.to_string(), acked_task_id);
        info.stolen_since_renew = 0;
        let remote = remote_cluster_info_mut(&mut st, cluster);
        remote.acked_replication_task_id = acked_task_id;
        remote.acked_replication_timestamp_ms = acked_timestamp_ms;
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn timer_ack_level(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.timer_ack_level_ms)
    }

    pub async fn update_timer_ack_level(
        &self,
        ack_level_ms: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.timer_ack_level_ms = ack_level_ms;
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    /// Per-cluster timer ack level; an unknown cluster defaults to the
    /// local timer ack level.
    pub async fn timer_cluster_ack_level(&self, cluster: &str) -> Result<i64, ShardError> {
        let st = self.read_lock().await;
        let info = st.info()?;
        Ok(info
            .cluster_timer_ack_level_ms
            .get(cluster)
            .copied()
            .unwrap_or(info.timer_ack_level_ms))
    }

    pub async fn update_timer_cluster_ack_level(
        &self,
        cluster: &str,
        ack_level_ms: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        let info = st.info_mut()?;
        info.cluster_timer_ack_level_ms
            .insert(cluster.to_string(), ack_level_ms);
        info.stolen_since_renew = 0;
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn update_transfer_failover_level(
        &self,
        failover_id: &str,
        level: TransferFailoverLevel,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        st.info_mut()?
            .transfer_failover_levels
            .insert(failover_id.to_string(), level);
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn delete_transfer_failover_level(
        &self,
        failover_id: &str,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        if let Some(level) = st.info_mut()?.transfer_failover_levels.remove(failover_id) {
            let latency_ms = self.time_source.now_ms() - level.start_time_ms;
            self.metrics
                .record_transfer_failover_latency(&self.shard_label, latency_ms);
        }
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn all_transfer_failover_levels(
        &self,
    ) -> Result<HashMap<String, TransferFailoverLevel>, ShardError> {
        Ok(self.read_lock().await.info()?.transfer_failover_levels.clone())
    }

    pub async fn update_timer_failover_level(
        &self,
        failover_id: &str,
        level: TimerFailoverLevel,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        st.info_mut()?
            .timer_failover_levels
            .insert(failover_id.to_string(), level);
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn delete_timer_failover_level(
        &self,
        failover_id: &str,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        if let Some(level) = st.info_mut()?.timer_failover_levels.remove(failover_id) {
            let latency_ms = self.time_source.now_ms() - level.start_time_ms;
            self.metrics
                .record_timer_failover_latency(&self.shard_label, latency_ms);
        }
        self.update_shard_info_locked(&mut st).await
    }

    pub async fn all_timer_failover_levels(
        &self,
    ) -> Result<HashMap<String, TimerFailoverLevel>, ShardError> {
        Ok(self.read_lock().await.info()?.timer_failover_levels.clone())
    }

    pub async fn namespace_notification_version(&self) -> Result<i64, ShardError> {
        Ok(self.read_lock().await.info()?.namespace_notification_version)
    }

    pub async fn update_namespace_notification_version(
        &self,
        version: i64,
    ) -> Result<(), ShardError> {
        let mut st = self.write_lock().await;
        st.info_mut()?.namespace_notification_version = version;
        self.update_shard_info_locked(&mut st).await
    }

    /// Upper bound of timer visibility times handed out for a cluster. An
    /// empty cluster name means the local cluster.
    pub async fn timer_max_read_level(&self, cluster: &str) -> i64 {
        let st = self.read_lock().await;
        let local;
        let cluster = if cluster.is_empty() {
            local = self.cluster_metadata.current_cluster_name();
            local.as_str()
        } else {
            cluster
        };
        st.timer_max_read_level.get(cluster).copied().unwrap_or(0)
    }

    /// Advance a cluster's timer read cursor past its observed clock. An
    /// empty cluster name means the local cluster.
    pub async fn update_timer_max_read_level(&self, cluster: &str) -> i64 {
        let mut st = self.write_lock().await;
        let local = self.cluster_metadata.current_cluster_name();
        let cluster = if cluster.is_empty() { local.as_str() } else { cluster };

        let current_time_ms = if cluster != local {
            remote_cluster_info_mut(&mut st, cluster).current_time_ms
        } else {
            self.time_source.now_ms()
        };

        let level = current_time_ms + self.config.timer_processor_max_time_shift_ms;
        st.timer_max_read_level.insert(cluster.to_string(), level);
        level
    }

    /// Observed clock of a cluster: the wall clock for the local cluster,
    /// the last reported peer time for a remote one.
    pub async fn current_time(&self, cluster: &str) -> i64 {
        let st = self.read_lock().await;
        if cluster != self.cluster_metadata.current_cluster_name() {
            return st
                .remote_cluster_infos
                .get(cluster)
                .map(|info| info.current_time_ms)
                .unwrap_or(0);
        }
        self.time_source.now_ms()
    }

    /// Record a remote cluster's observed clock. Time never moves
    /// backwards: a non-monotonic report is ignored.
    ///
    /// # Panics
    ///
    /// Panics if `cluster` is the local cluster, whose clock is the wall
    /// clock and cannot be set.
    pub async fn set_current_time(&self, cluster: &str, current_time_ms: i64) {
        let mut st = self.write_lock().await;
        if cluster == self.cluster_metadata.current_cluster_name() {
            panic!("cannot set current time for the local cluster");
        }
        let remote = remote_cluster_info_mut(&mut st, cluster);
        if remote.current_time_ms < current_time_ms {
            remote.current_time_ms = current_time_ms;
        }
    }

    /// Epoch ms of the last successful durable shard-info flush.
    pub async fn last_updated_time(&self) -> i64 {
        self.read_lock().await.last_updated_ms
    }

    /// Remote replication progress. An empty `clusters` slice means all
    /// known remote clusters.
    pub async fn remote_cluster_ack_info(
        &self,
        clusters: &[String],
    ) -> HashMap<String, RemoteAckInfo> {
        let st = self.read_lock().await;
        let mut result = HashMap::new();
        if clusters.is_empty() {
            for (cluster, info) in &st.remote_cluster_infos {
                result.insert(cluster.clone(), remote_ack_info(info));
            }
        } else {
            for cluster in clusters {
                if let Some(info) = st.remote_cluster_infos.get(cluster) {
                    result.insert(cluster.clone(), remote_ack_info(info));
                }
            }
        }
        result
    }

    /// Flush the cached shard record, at most once per configured interval.
    /// Mutations inside the window stay in memory and ride along with the
    /// next flush.
    pub(crate) async fn update_shard_info_locked(
        &self,
        st: &mut ShardState,
    ) -> Result<(), ShardError> {
        st.gate()?;

        let now_ms = self.time_source.now_ms();
        if st.last_updated_ms + self.config.shard_update_min_interval_ms > now_ms {
            return Ok(());
        }

        self.emit_shard_info_metrics_locked(st);

        let mut snapshot = st.info()?.clone();
        snapshot.update_time_ms = now_ms;
        let previous_range_id = snapshot.range_id;
        let result = self
            .shard_store
            .update_shard(UpdateShardRequest {
                shard_info: snapshot.clone(),
                previous_range_id,
            })
            .await;
        match result {
            Ok(()) => {
                st.shard_info = Some(snapshot);
                st.last_updated_ms = now_ms;
                Ok(())
            }
            Err(err) => Err(self.handle_store_error_locked(st, err)),
        }
    }

    /// Ack-level spreads and lags, published before every flush. Warns when
    /// a spread or lag breaches the configured thresholds and the diff log
    /// is enabled.
    fn emit_shard_info_metrics_locked(&self, st: &ShardState) {
        let Ok(info) = st.info() else {
            return;
        };
        let local = self.cluster_metadata.current_cluster_name();

        let base_transfer = info
            .cluster_transfer_ack_level
            .get(&local)
            .copied()
            .unwrap_or(0);
        let mut min_transfer = base_transfer;
        let mut max_transfer = base_transfer;
        for level in info.cluster_transfer_ack_level.values() {
            min_transfer = min_transfer.min(*level);
            max_transfer = max_transfer.max(*level);
        }
        let transfer_level_diff = max_transfer - min_transfer;

        let base_timer = info
            .cluster_timer_ack_level_ms
            .get(&local)
            .copied()
            .unwrap_or(0);
        let mut min_timer = base_timer;
        let mut max_timer = base_timer;
        for level in info.cluster_timer_ack_level_ms.values() {
            min_timer = min_timer.min(*level);
            max_timer = max_timer.max(*level);
        }
        let timer_level_diff_ms = max_timer - min_timer;

        let replication_lag = st.transfer_max_read_level - info.replication_ack_level;
        let transfer_lag = st.transfer_max_read_level - info.transfer_ack_level;
        let timer_lag_ms = self.time_source.now_ms() - info.timer_ack_level_ms;

        if self.config.emit_shard_diff_log
            && (transfer_level_diff > self.config.log_warn_transfer_level_diff
                || timer_level_diff_ms > self.config.log_warn_timer_level_diff_ms
                || transfer_lag > self.config.log_warn_transfer_level_diff
                || timer_lag_ms > self.config.log_warn_timer_level_diff_ms)
        {
            warn!(
                shard_id = self.shard_id,
                transfer_level_diff,
                timer_level_diff_ms,
                transfer_lag,
                timer_lag_ms,
                replication_ack_level = info.replication_ack_level,
                "shard: ack level spread exceeds warn threshold"
            );
        }

        self.metrics.record_shard_info(
            &self.shard_label,
            transfer_level_diff,
            timer_level_diff_ms,
            transfer_lag,
            replication_lag,
            timer_lag_ms,
            info.transfer_failover_levels.len(),
            info.timer_failover_levels.len(),
        );
    }
}

fn remote_ack_info(info: &RemoteClusterInfo) -> RemoteAckInfo {
    RemoteAckInfo {
        acked_task_id: info.acked_replication_task_id,
        acked_task_visibility_time_ms: info.acked_replication_timestamp_ms,
    }
}

fn remote_cluster_info_mut<'a>(st: &'a mut ShardState, cluster: &str) -> &'a mut RemoteClusterInfo {
    st.remote_cluster_infos
        .entry(cluster.to_string())
        .or_default()
}
