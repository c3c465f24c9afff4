//! Namespace-registry collaborator interface.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::ShardError;

/// Cached namespace metadata the shard context needs during writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub id: String,
    pub name: String,
    /// The cluster currently active for this namespace; timer tasks that
    /// carry a failover version are cursored against this cluster.
    pub active_cluster_name: String,
}

/// Read-through cache of namespace metadata.
///
/// Lookups must never be performed while holding a shard lock; the shard
/// context resolves namespaces before locking.
pub trait NamespaceRegistry: Send + Sync {
    fn namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, ShardError>;
}

/// In-memory registry, useful for single-cluster deployments and tests.
#[derive(Debug, Default)]
pub struct StaticNamespaceRegistry {
    entries: RwLock<HashMap<String, NamespaceEntry>>,
}

impl StaticNamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: NamespaceEntry) {
        self.entries
            .write()
            .expect("namespace registry lock poisoned")
            .insert(entry.id.clone(), entry);
    }
}

impl NamespaceRegistry for StaticNamespaceRegistry {
    fn namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, ShardError> {
        self.entries
            .read()
            .expect("namespace registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ShardError::NamespaceNotFound(id.to_string()))
    }
}
