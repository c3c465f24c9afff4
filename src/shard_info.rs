//! The durable shard-metadata record and its in-memory companions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sentinel installed as the in-memory range id when the shard enters
/// Stopping, so any still-in-flight conditional write is rejected.
pub const INVALID_RANGE_ID: i64 = -1;

/// Replication queues start from this id when a cluster has no recorded
/// level yet.
pub const EMPTY_QUEUE_MESSAGE_ID: i64 = -1;

/// An in-progress namespace failover on the transfer queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailoverLevel {
    /// Epoch ms at which the failover began; used for latency metrics.
    pub start_time_ms: i64,
    pub min_level: i64,
    pub current_level: i64,
    pub max_level: i64,
    pub namespace_ids: Vec<String>,
}

/// An in-progress namespace failover on the timer queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFailoverLevel {
    pub start_time_ms: i64,
    pub min_level_ms: i64,
    pub current_level_ms: i64,
    pub max_level_ms: i64,
    pub namespace_ids: Vec<String>,
}

/// Durable per-shard metadata. One record per shard, updated only through
/// conditional writes gated on `range_id`.
///
/// All instants are epoch milliseconds; an absent or zero timer ack level
/// means the epoch. `Clone` produces a deep copy (every durable write goes
/// through a fresh copy so a failed write never publishes a half-mutated
/// record).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: i32,
    /// Identity of the host currently holding the lease.
    pub owner: String,
    /// Lease generation; incremented by every acquisition and renewal.
    pub range_id: i64,
    /// Acquisitions since the last successful ack-level update.
    pub stolen_since_renew: i32,

    pub replication_ack_level: i64,
    pub transfer_ack_level: i64,
    pub visibility_ack_level: i64,
    pub tiered_storage_ack_level: i64,
    pub timer_ack_level_ms: i64,

    pub cluster_transfer_ack_level: HashMap<String, i64>,
    pub cluster_timer_ack_level_ms: HashMap<String, i64>,
    pub cluster_replication_level: HashMap<String, i64>,
    pub replication_dlq_ack_level: HashMap<String, i64>,

    pub transfer_failover_levels: HashMap<String, TransferFailoverLevel>,
    pub timer_failover_levels: HashMap<String, TimerFailoverLevel>,

    pub namespace_notification_version: i64,
    /// Epoch ms of the last durable update of this record.
    pub update_time_ms: i64,
}

impl ShardInfo {
    pub fn new(shard_id: i32) -> Self {
        Self {
            shard_id,
            ..Self::default()
        }
    }
}

/// In-memory view of a remote replicator cluster. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClusterInfo {
    /// Last observed clock of the peer, epoch ms.
    pub current_time_ms: i64,
    pub acked_replication_task_id: i64,
    pub acked_replication_timestamp_ms: i64,
}

impl Default for RemoteClusterInfo {
    fn default() -> Self {
        Self {
            current_time_ms: 0,
            acked_replication_task_id: EMPTY_QUEUE_MESSAGE_ID,
            acked_replication_timestamp_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_a_deep_copy() {
        let mut original = ShardInfo::new(7);
        original.range_id = 3;
        original
            .cluster_transfer_ack_level
            .insert("east".to_string(), 100);
        original.transfer_failover_levels.insert(
            "f1".to_string(),
            TransferFailoverLevel {
                start_time_ms: 1,
                min_level: 2,
                current_level: 3,
                max_level: 4,
                namespace_ids: vec!["ns".to_string()],
            },
        );

        let mut copy = original.clone();
        copy.range_id = 99;
        copy.cluster_transfer_ack_level.insert("east".to_string(), 999);
        copy.transfer_failover_levels
            .get_mut("f1")
            .unwrap()
            .namespace_ids
            .push("other".to_string());

        assert_eq!(original.range_id, 3);
        assert_eq!(original.cluster_transfer_ack_level["east"], 100);
        assert_eq!(
            original.transfer_failover_levels["f1"].namespace_ids,
            vec!["ns".to_string()]
        );
    }

    #[test]
    fn remote_cluster_info_defaults_to_empty_queue() {
        let info = RemoteClusterInfo::default();
        assert_eq!(info.acked_replication_task_id, EMPTY_QUEUE_MESSAGE_ID);
        assert_eq!(info.current_time_ms, 0);
    }
}
