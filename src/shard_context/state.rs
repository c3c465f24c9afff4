//! Shard lifecycle state machine and store-error classification.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ShardError, StoreError};
use crate::shard_info::INVALID_RANGE_ID;

use super::{ShardContext, ShardState};

/// Lifecycle phase of a shard context.
///
/// The normal path is Initialized → Acquiring → Acquired. A transient
/// store error sends Acquired back to Acquiring; ownership loss or a
/// spent acquisition budget sends any phase to Stopping; the controller's
/// `stop` finishes in Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShardPhase {
    Initialized,
    Acquiring,
    Acquired,
    Stopping,
    Stopped,
}

impl fmt::Display for ShardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardPhase::Initialized => write!(f, "Initialized"),
            ShardPhase::Acquiring => write!(f, "Acquiring"),
            ShardPhase::Acquired => write!(f, "Acquired"),
            ShardPhase::Stopping => write!(f, "Stopping"),
            ShardPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Requests that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseRequest {
    /// Controller asks the shard to obtain its lease.
    Acquire,
    /// The acquisition task reports the lease is held. Only the
    /// acquisition task may emit this.
    Acquired,
    /// A store call failed in a way that leaves the lease in doubt.
    Lost,
    /// The lease is gone (stolen, or acquisition gave up); shut down via
    /// the close callback.
    Stop,
    /// Controller-driven final stop.
    FinishStop,
}

impl fmt::Display for PhaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseRequest::Acquire => write!(f, "Acquire"),
            PhaseRequest::Acquired => write!(f, "Acquired"),
            PhaseRequest::Lost => write!(f, "Lost"),
            PhaseRequest::Stop => write!(f, "Stop"),
            PhaseRequest::FinishStop => write!(f, "FinishStop"),
        }
    }
}

impl ShardState {
    /// Gate every public operation on the current phase.
    pub(crate) fn gate(&self) -> Result<(), ShardError> {
        match self.phase {
            ShardPhase::Initialized | ShardPhase::Acquiring => Err(ShardError::StatusUnknown),
            ShardPhase::Acquired => Ok(()),
            ShardPhase::Stopping | ShardPhase::Stopped => Err(ShardError::Closed),
        }
    }
}

impl ShardContext {
    /// `start` must be called exactly once, by the shard controller.
    pub async fn start(&self) {
        let mut st = self.write_lock().await;
        self.transition_locked(&mut st, PhaseRequest::Acquire);
    }

    /// `stop` must be called exactly once per context, by the shard
    /// controller. The engine, if any, is stopped outside the lock.
    pub async fn stop(&self) {
        let engine = {
            let mut st = self.write_lock().await;
            self.transition_locked(&mut st, PhaseRequest::FinishStop);
            st.engine.take()
        };
        if let Some(engine) = engine {
            info!(shard_id = self.shard_id, "shard: stopping engine");
            engine.stop().await;
            info!(shard_id = self.shard_id, "shard: engine stopped");
        }
    }

    /// Whether the shard is still serving (or about to serve) requests.
    pub async fn is_valid(&self) -> bool {
        self.read_lock().await.phase < ShardPhase::Stopping
    }

    pub async fn phase(&self) -> ShardPhase {
        self.read_lock().await.phase
    }

    /// Apply one transition request. No-op rows of the transition table
    /// return silently; rows absent from the table log a warning.
    pub(crate) fn transition_locked(&self, st: &mut ShardState, request: PhaseRequest) {
        match st.phase {
            ShardPhase::Initialized => match request {
                PhaseRequest::Acquire => return self.set_acquiring_locked(st),
                PhaseRequest::Stop => return self.set_stopping_locked(st),
                PhaseRequest::FinishStop => return set_stopped_locked(st),
                _ => {}
            },
            ShardPhase::Acquiring => match request {
                PhaseRequest::Acquire => return, // already acquiring
                PhaseRequest::Acquired => {
                    st.phase = ShardPhase::Acquired;
                    return;
                }
                PhaseRequest::Lost => return, // already acquiring
                PhaseRequest::Stop => return self.set_stopping_locked(st),
                PhaseRequest::FinishStop => return set_stopped_locked(st),
            },
            ShardPhase::Acquired => match request {
                PhaseRequest::Acquire => return, // already acquired
                PhaseRequest::Lost => return self.set_acquiring_locked(st),
                PhaseRequest::Stop => return self.set_stopping_locked(st),
                PhaseRequest::FinishStop => return set_stopped_locked(st),
                _ => {}
            },
            ShardPhase::Stopping => match request {
                PhaseRequest::Stop => return, // already stopping
                PhaseRequest::FinishStop => return set_stopped_locked(st),
                _ => {}
            },
            ShardPhase::Stopped => {}
        }
        warn!(
            shard_id = self.shard_id,
            phase = %st.phase,
            request = %request,
            "shard: invalid phase transition request"
        );
    }

    fn set_acquiring_locked(&self, st: &mut ShardState) {
        st.phase = ShardPhase::Acquiring;
        // The weak self-reference only fails to upgrade during teardown,
        // when there is nothing left to acquire for.
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(me.acquire_shard());
        }
    }

    fn set_stopping_locked(&self, st: &mut ShardState) {
        st.phase = ShardPhase::Stopping;
        // The phase gate already fails all writes; invalidating the cached
        // range id additionally fences any still-in-flight store call. If
        // the record was never loaded there is nothing to invalidate.
        if let Some(info) = st.shard_info.as_mut() {
            info.range_id = INVALID_RANGE_ID;
        }
        // The callback must make the controller call stop() on us.
        let callback = Arc::clone(&self.close_callback);
        let shard_id = self.shard_id;
        tokio::spawn(async move { callback(shard_id) });
    }

    /// Classify a store error: condition failures and resource exhaustion
    /// pass through; ownership loss stops the shard; anything else means
    /// the write outcome is unknown, so the lease is re-acquired to fence
    /// it with a fresh range id.
    pub(crate) fn handle_store_error_locked(
        &self,
        st: &mut ShardState,
        err: StoreError,
    ) -> ShardError {
        match &err {
            StoreError::CurrentWorkflowConditionFailed(_)
            | StoreError::WorkflowConditionFailed(_)
            | StoreError::ConditionFailed(_)
            | StoreError::ResourceExhausted(_) => {}
            StoreError::ShardOwnershipLost { .. } => {
                self.transition_locked(st, PhaseRequest::Stop);
            }
            _ => {
                self.transition_locked(st, PhaseRequest::Lost);
            }
        }
        ShardError::Store(err)
    }
}

fn set_stopped_locked(st: &mut ShardState) {
    st.phase = ShardPhase::Stopped;
}
