//! Per-shard coordination kernel.
//!
//! One `ShardContext` exists per owned shard. It holds the shard's lease
//! over the durable stores, allocates monotonic task ids within the lease,
//! tracks ack levels for the task queues and remote clusters, fences every
//! write on the lease generation, and manages the lifecycle of the
//! per-shard engine. Split across submodules:
//!
//! - `state`: the five-phase lifecycle machine and error classification
//! - `acquire`: the background lease-acquisition task and engine accessors
//! - `ids`: lease renewal and task-id allocation
//! - `ack`: ack-level registry with rate-limited durable flush
//! - `writes`: the write gateway over the execution store

mod ack;
mod acquire;
mod ids;
mod state;
mod writes;

pub use ack::RemoteAckInfo;
pub use state::ShardPhase;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;

use crate::cluster::ClusterMetadata;
use crate::clock::TimeSource;
use crate::engine::{Engine, EngineFactory};
use crate::metrics::Metrics;
use crate::namespace::NamespaceRegistry;
use crate::persistence::{ExecutionStore, ShardStore};
use crate::settings::ShardConfig;
use crate::shard_info::{RemoteClusterInfo, ShardInfo, INVALID_RANGE_ID};

/// Invoked on a fresh task when the shard stops itself (ownership lost or
/// acquisition gave up). The callback receives the shard id and must
/// arrange for the controller to call [`ShardContext::stop`].
pub type CloseCallback = Arc<dyn Fn(i32) + Send + Sync>;

/// Construction-time collaborators of a [`ShardContext`].
pub struct ShardContextParams {
    pub shard_id: i32,
    pub config: ShardConfig,
    pub shard_store: Arc<dyn ShardStore>,
    pub execution_store: Arc<dyn ExecutionStore>,
    pub namespace_registry: Arc<dyn NamespaceRegistry>,
    pub cluster_metadata: Arc<dyn ClusterMetadata>,
    pub time_source: Arc<dyn TimeSource>,
    pub engine_factory: Arc<dyn EngineFactory>,
    /// Identity of this host, stamped into the shard record on acquisition.
    pub host_identity: String,
    pub metrics: Metrics,
    pub close_callback: CloseCallback,
}

/// All mutable state of a shard context, guarded by one readers-writer
/// lock. Methods named `*_locked` assume the exclusive guard is held.
pub(crate) struct ShardState {
    pub(crate) phase: ShardPhase,
    pub(crate) engine: Option<Arc<dyn Engine>>,
    /// Epoch ms of the last successful durable shard-info flush.
    pub(crate) last_updated_ms: i64,
    /// `None` until the acquisition task loads the record.
    pub(crate) shard_info: Option<ShardInfo>,
    /// Next task id to hand out.
    pub(crate) transfer_sequence_number: i64,
    /// Exclusive upper bound of the current lease's id block.
    pub(crate) max_transfer_sequence_number: i64,
    /// Highest id known to be covered by a completed persistence write.
    pub(crate) transfer_max_read_level: i64,
    /// Per-cluster upper bound of timer visibility times handed out.
    pub(crate) timer_max_read_level: HashMap<String, i64>,
    pub(crate) remote_cluster_infos: HashMap<String, RemoteClusterInfo>,
}

impl ShardState {
    pub(crate) fn info(&self) -> Result<&ShardInfo, crate::error::ShardError> {
        self.shard_info
            .as_ref()
            .ok_or(crate::error::ShardError::StatusUnknown)
    }

    pub(crate) fn info_mut(&mut self) -> Result<&mut ShardInfo, crate::error::ShardError> {
        self.shard_info
            .as_mut()
            .ok_or(crate::error::ShardError::StatusUnknown)
    }

    /// Range id to stamp on a fenced write. [`INVALID_RANGE_ID`] when the
    /// record is not loaded, which any conformant store rejects.
    pub(crate) fn range_id(&self) -> i64 {
        self.shard_info
            .as_ref()
            .map(|info| info.range_id)
            .unwrap_or(INVALID_RANGE_ID)
    }
}

/// The per-shard coordination kernel. Create with [`ShardContext::new`],
/// then drive through [`start`](ShardContext::start) /
/// [`stop`](ShardContext::stop) from the shard controller.
pub struct ShardContext {
    // Constant after construction
    /// Self-reference for spawning background tasks from transitions.
    pub(crate) me: Weak<ShardContext>,
    pub(crate) shard_id: i32,
    pub(crate) shard_label: String,
    pub(crate) config: ShardConfig,
    pub(crate) shard_store: Arc<dyn ShardStore>,
    pub(crate) execution_store: Arc<dyn ExecutionStore>,
    pub(crate) namespace_registry: Arc<dyn NamespaceRegistry>,
    pub(crate) cluster_metadata: Arc<dyn ClusterMetadata>,
    pub(crate) time_source: Arc<dyn TimeSource>,
    pub(crate) engine_factory: Arc<dyn EngineFactory>,
    pub(crate) host_identity: String,
    pub(crate) metrics: Metrics,
    pub(crate) close_callback: CloseCallback,

    // Everything mutable lives behind this lock
    state: RwLock<ShardState>,
}

impl ShardContext {
    pub fn new(params: ShardContextParams) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            shard_id: params.shard_id,
            shard_label: params.shard_id.to_string(),
            config: params.config,
            shard_store: params.shard_store,
            execution_store: params.execution_store,
            namespace_registry: params.namespace_registry,
            cluster_metadata: params.cluster_metadata,
            time_source: params.time_source,
            engine_factory: params.engine_factory,
            host_identity: params.host_identity,
            metrics: params.metrics,
            close_callback: params.close_callback,
            state: RwLock::new(ShardState {
                phase: ShardPhase::Initialized,
                engine: None,
                last_updated_ms: 0,
                shard_info: None,
                transfer_sequence_number: 0,
                max_transfer_sequence_number: 0,
                transfer_max_read_level: 0,
                timer_max_read_level: HashMap::new(),
                remote_cluster_infos: HashMap::new(),
            }),
        })
    }

    pub fn shard_id(&self) -> i32 {
        self.shard_id
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn execution_store(&self) -> &Arc<dyn ExecutionStore> {
        &self.execution_store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) async fn read_lock(&self) -> RwLockReadGuard<'_, ShardState> {
        self.metrics.record_lock_request(&self.shard_label);
        let started = Instant::now();
        let guard = self.state.read().await;
        self.metrics
            .record_lock_latency(&self.shard_label, started.elapsed());
        guard
    }

    pub(crate) async fn write_lock(&self) -> RwLockWriteGuard<'_, ShardState> {
        self.metrics.record_lock_request(&self.shard_label);
        let started = Instant::now();
        let guard = self.state.write().await;
        self.metrics
            .record_lock_latency(&self.shard_label, started.elapsed());
        guard
    }
}
