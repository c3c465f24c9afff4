//! # Weft
//!
//! The per-shard coordination kernel of a horizontally partitioned
//! workflow-history service. The service owns a fixed number of logical
//! shards; each shard is assigned to one host at a time, and that host's
//! [`ShardContext`](shard_context::ShardContext) mediates every write for
//! the workflow executions that hash into the shard.
//!
//! A shard context:
//! - holds the shard's lease over durable storage, fenced by a
//!   monotonically increasing range id,
//! - allocates globally monotonic task ids within the lease,
//! - tracks acknowledgment high-water-marks for the task queues and for
//!   remote replicator clusters,
//! - rejects writes once the lease is lost, and
//! - owns the lifecycle of the per-shard engine.
//!
//! The durable stores, namespace registry, cluster topology, engine
//! factory, and clock are injected behind the traits in [`persistence`],
//! [`namespace`], [`cluster`], [`engine`], and [`clock`].

pub mod backoff;
pub mod clock;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod persistence;
pub mod settings;
pub mod shard_context;
pub mod shard_info;
pub mod task;

pub use error::{ShardError, StoreError};
pub use shard_context::{ShardContext, ShardContextParams, ShardPhase};
pub use shard_info::ShardInfo;
pub use task::{Task, TaskSet, WorkflowKey};
