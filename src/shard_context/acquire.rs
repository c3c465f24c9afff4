//! Background lease acquisition and the engine accessors.
//!
//! Entering the Acquiring phase spawns `acquire_shard`, which loads the
//! shard record (once), steals the lease by renewing the range id, creates
//! and installs the engine on first acquisition, and reports Acquired.
//! Failures retry with exponential backoff under a total budget; spending
//! the budget, or losing ownership outright, stops the shard.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};

use crate::engine::Engine;
use crate::error::{ShardError, StoreError};
use crate::persistence::GetOrCreateShardRequest;
use crate::shard_info::RemoteClusterInfo;

use super::state::{PhaseRequest, ShardPhase};
use super::ShardContext;

/// Outcome of one acquisition attempt.
enum AcquireError {
    /// The phase flipped to Stopping underneath us; exit silently, the
    /// controller owns the shutdown.
    Stopping,
    Store(StoreError),
}

impl ShardContext {
    /// The engine, if the shard currently holds its lease.
    pub async fn engine(&self) -> Result<Arc<dyn Engine>, ShardError> {
        let st = self.read_lock().await;
        st.gate()?;
        st.engine.clone().ok_or(ShardError::StatusUnknown)
    }

    /// Wait for the engine through the Acquiring window.
    ///
    /// Polls the in-memory phase (the acquisition task does the real work),
    /// retrying only while the status is unknown. The returned future is
    /// cancel-safe; bound it with `tokio::time::timeout` or `select!` to
    /// impose a deadline.
    pub async fn wait_for_engine(&self) -> Result<Arc<dyn Engine>, ShardError> {
        let policy = self.config.engine_probe_retry_policy();
        let mut backoff = policy.start();
        loop {
            match self.engine().await {
                Err(ShardError::StatusUnknown) => {
                    let delay = backoff
                        .next_delay()
                        .unwrap_or(policy.max_interval);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Body of the background acquisition task. Spawned on every entry to
    /// the Acquiring phase; only this task emits `PhaseRequest::Acquired`.
    pub(crate) async fn acquire_shard(self: Arc<Self>) {
        let span = info_span!("shard.acquire", shard_id = self.shard_id);
        async {
            let policy = self.config.acquire_retry_policy();
            let mut backoff = policy.start();
            // Whether the previous owner was a different host; remembered
            // across attempts for the acquisition-latency metric.
            let mut ownership_changed = false;

            let terminal_err = loop {
                match self.try_acquire(&mut ownership_changed).await {
                    Ok(()) => return,
                    Err(AcquireError::Stopping) => return,
                    Err(AcquireError::Store(err)) if err.is_transient() => {
                        match backoff.next_delay() {
                            Some(delay) => tokio::time::sleep(delay).await,
                            None => break err,
                        }
                    }
                    Err(AcquireError::Store(err)) => break err,
                }
            };

            error!(
                shard_id = self.shard_id,
                error = %terminal_err,
                attempts = backoff.attempts(),
                "shard: could not acquire lease"
            );

            // Unless something else already initiated shutdown, stop the
            // shard ourselves.
            let mut st = self.write_lock().await;
            if st.phase >= ShardPhase::Stopping {
                return;
            }
            self.transition_locked(&mut st, PhaseRequest::Stop);
        }
        .instrument(span)
        .await
    }

    async fn try_acquire(
        &self,
        ownership_changed: &mut bool,
    ) -> Result<(), AcquireError> {
        self.load_shard_metadata(ownership_changed).await?;

        let mut st = self.write_lock().await;
        if st.phase >= ShardPhase::Stopping {
            return Err(AcquireError::Stopping);
        }

        // Steal the lease. Ownership loss transitions to Stopping right
        // here via error classification; transient errors leave the phase
        // at Acquiring and we retry.
        if let Err(err) = self.renew_range_locked(&mut st, true).await {
            return Err(match err {
                ShardError::Store(store_err) => AcquireError::Store(store_err),
                other => AcquireError::Store(StoreError::Internal(other.to_string())),
            });
        }

        info!(shard_id = self.shard_id, range_id = st.range_id(), "shard: lease acquired");

        // First acquisition: build the engine with the lock released (the
        // factory may call back into us), then re-check for a concurrent
        // stop before installing it.
        if st.engine.is_none() {
            drop(st);
            self.maybe_record_acquisition_latency(*ownership_changed).await;
            let Some(engine) = self.create_engine().await else {
                return Err(AcquireError::Stopping);
            };
            st = self.write_lock().await;
            if st.phase >= ShardPhase::Stopping {
                drop(st);
                engine.stop().await;
                return Err(AcquireError::Stopping);
            }
            st.engine = Some(engine);
        }

        self.transition_locked(&mut st, PhaseRequest::Acquired);
        Ok(())
    }

    /// Load the shard record on first acquisition; later attempts only
    /// re-take the range lock. The store fetch happens outside any lock.
    async fn load_shard_metadata(
        &self,
        ownership_changed: &mut bool,
    ) -> Result<(), AcquireError> {
        {
            let st = self.read_lock().await;
            if st.phase >= ShardPhase::Stopping {
                return Err(AcquireError::Stopping);
            }
            if st.shard_info.is_some() {
                return Ok(());
            }
        }

        let response = self
            .shard_store
            .get_or_create_shard(GetOrCreateShardRequest {
                shard_id: self.shard_id,
                create_if_missing: true,
            })
            .await
            .map_err(|err| {
                error!(shard_id = self.shard_id, error = %err, "shard: failed to load record");
                AcquireError::Store(err)
            })?;

        let mut shard_info = response.shard_info;
        *ownership_changed = shard_info.owner != self.host_identity;
        shard_info.owner = self.host_identity.clone();

        // Seed remote-cluster clocks and timer read cursors from the
        // persisted ack levels; only enabled clusters take part.
        let local = self.cluster_metadata.current_cluster_name();
        let mut remote_cluster_infos = HashMap::new();
        let mut timer_max_read_level = HashMap::new();
        for (cluster, cluster_info) in self.cluster_metadata.all_cluster_info() {
            if !cluster_info.enabled {
                continue;
            }
            let mut read_time_ms = shard_info.timer_ack_level_ms;
            if cluster != local {
                if let Some(level) = shard_info.cluster_timer_ack_level_ms.get(&cluster) {
                    read_time_ms = *level;
                }
                remote_cluster_infos.insert(
                    cluster.clone(),
                    RemoteClusterInfo {
                        current_time_ms: read_time_ms,
                        ..RemoteClusterInfo::default()
                    },
                );
            }
            timer_max_read_level.insert(cluster, read_time_ms);
        }

        let mut st = self.write_lock().await;
        if st.phase >= ShardPhase::Stopping {
            return Err(AcquireError::Stopping);
        }
        st.shard_info = Some(shard_info);
        st.remote_cluster_infos = remote_cluster_infos;
        st.timer_max_read_level = timer_max_read_level;
        Ok(())
    }

    /// Construct and start the engine. `None` only during teardown, when
    /// the self-reference is gone and there is no shard to hand out.
    async fn create_engine(&self) -> Option<Arc<dyn Engine>> {
        let me = self.me.upgrade()?;
        info!(shard_id = self.shard_id, "shard: starting engine");
        let engine = self.engine_factory.create_engine(me);
        engine.start().await;
        info!(shard_id = self.shard_id, "shard: engine started");
        Some(engine)
    }

    /// When the lease moved between hosts, record how long the shard went
    /// without a durable flush. (The wall clock minus the last flush time,
    /// not the time since the previous owner lost the lease.)
    async fn maybe_record_acquisition_latency(&self, ownership_changed: bool) {
        if !ownership_changed {
            return;
        }
        let local = self.cluster_metadata.current_cluster_name();
        let now_ms = self.current_time(&local).await;
        let last_updated_ms = self.last_updated_time().await;
        self.metrics
            .record_acquisition_latency(&self.shard_label, now_ms - last_updated_ms);
    }
}
