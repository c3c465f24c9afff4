//! Task model: the units of asynchronous work a shard enqueues alongside
//! workflow writes.
//!
//! Tasks are grouped into four queues (transfer, timer, replication,
//! visibility). The shard context assigns every task a 64-bit monotonic id
//! whose high bits carry the lease generation; timer tasks additionally
//! carry a visibility timestamp that is kept monotonic per cluster.

use serde::{Deserialize, Serialize};

/// A task whose version equals this value is not tied to any failover
/// version and is always processed by the local cluster.
pub const EMPTY_VERSION: i64 = 0;

/// Identifies one workflow execution within a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowKey {
    pub fn new(
        namespace_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// One queued unit of work. `task_id` is zero until the shard context
/// assigns it during a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    /// Epoch ms at which the task becomes visible to its queue processor.
    /// Meaningful for timer tasks; informational for the other queues.
    pub visibility_time_ms: i64,
    /// Failover version; [`EMPTY_VERSION`] when not versioned.
    pub version: i64,
}

impl Task {
    pub fn new(visibility_time_ms: i64, version: i64) -> Self {
        Self {
            task_id: 0,
            visibility_time_ms,
            version,
        }
    }
}

/// The four per-queue task vectors embedded in a workflow write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSet {
    pub transfer_tasks: Vec<Task>,
    pub timer_tasks: Vec<Task>,
    pub replication_tasks: Vec<Task>,
    pub visibility_tasks: Vec<Task>,
}

impl TaskSet {
    pub fn is_empty(&self) -> bool {
        self.transfer_tasks.is_empty()
            && self.timer_tasks.is_empty()
            && self.replication_tasks.is_empty()
            && self.visibility_tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_set_emptiness_covers_all_queues() {
        assert!(TaskSet::default().is_empty());
        let set = TaskSet {
            timer_tasks: vec![Task::new(1, EMPTY_VERSION)],
            ..TaskSet::default()
        };
        assert!(!set.is_empty());
    }
}
