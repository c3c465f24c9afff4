//! Per-shard engine interface.
//!
//! The engine is the long-lived worker that consumes a shard's task queues.
//! The shard context owns its lifecycle: it is constructed (via the injected
//! factory) and started by the acquisition task the first time the lease is
//! held, notified of new tasks after successful writes, and stopped exactly
//! once when the shard shuts down.

use std::sync::Arc;

use async_trait::async_trait;

use crate::shard_context::ShardContext;
use crate::task::Task;

#[async_trait]
pub trait Engine: Send + Sync + std::fmt::Debug {
    async fn start(&self);

    /// Idempotent; called outside the shard lock.
    async fn stop(&self);

    fn notify_new_transfer_tasks(&self, tasks: &[Task]);
    fn notify_new_timer_tasks(&self, tasks: &[Task]);
    fn notify_new_replication_tasks(&self, tasks: &[Task]);
    fn notify_new_visibility_tasks(&self, tasks: &[Task]);
}

/// Injected constructor for the per-shard engine. Invoked by the
/// acquisition task while the shard lock is released.
pub trait EngineFactory: Send + Sync {
    fn create_engine(&self, shard: Arc<ShardContext>) -> Arc<dyn Engine>;
}
