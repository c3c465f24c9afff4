//! Cluster-topology collaborator interface.

use std::collections::HashMap;

/// Per-cluster settings relevant to the shard context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub enabled: bool,
}

/// Read-only view of the deployment's cluster topology.
pub trait ClusterMetadata: Send + Sync {
    fn current_cluster_name(&self) -> String;

    fn all_cluster_info(&self) -> HashMap<String, ClusterInfo>;
}

/// Fixed topology, useful for single-process deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticClusterMetadata {
    current: String,
    clusters: HashMap<String, ClusterInfo>,
}

impl StaticClusterMetadata {
    pub fn new(current: impl Into<String>, clusters: HashMap<String, ClusterInfo>) -> Self {
        Self {
            current: current.into(),
            clusters,
        }
    }

    /// A topology with a single enabled cluster.
    pub fn single(current: impl Into<String>) -> Self {
        let current = current.into();
        let mut clusters = HashMap::new();
        clusters.insert(current.clone(), ClusterInfo { enabled: true });
        Self { current, clusters }
    }
}

impl ClusterMetadata for StaticClusterMetadata {
    fn current_cluster_name(&self) -> String {
        self.current.clone()
    }

    fn all_cluster_info(&self) -> HashMap<String, ClusterInfo> {
        self.clusters.clone()
    }
}
