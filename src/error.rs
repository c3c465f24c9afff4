//! Error taxonomy for the shard context.
//!
//! Two layers: [`StoreError`] is what the durable stores report, classified
//! by how the shard must react to it; [`ShardError`] is what the shard
//! context surfaces to its callers, wrapping store errors and adding the
//! two sentinel conditions raised by the context itself.

use thiserror::Error;

/// Errors reported by the shard-metadata and execution stores.
///
/// The first four variants are application-level: they are handed back to
/// the caller unchanged and never move the shard state machine. Ownership
/// loss stops the shard. Everything else means "we don't know whether the
/// write committed" and forces the shard to re-acquire its lease.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("current workflow condition failed: {0}")]
    CurrentWorkflowConditionFailed(String),

    #[error("workflow condition failed: {0}")]
    WorkflowConditionFailed(String),

    #[error("condition failed: {0}")]
    ConditionFailed(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The lease was stolen by a competing host. The conditional write was
    /// rejected because the stored range id no longer matches ours.
    #[error("shard ownership lost, now owned by {owner}")]
    ShardOwnershipLost { owner: String },

    #[error("store request timed out: {0}")]
    Timeout(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store internal failure: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Unavailable(_) | StoreError::ResourceExhausted(_)
        )
    }
}

/// Errors surfaced by the shard context to external callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    /// The shard is stopping or stopped and will never serve this request.
    #[error("shard closed")]
    Closed,

    /// The shard does not currently hold a valid lease; it is initializing
    /// or re-acquiring. Callers may retry.
    #[error("shard status unknown")]
    StatusUnknown,

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout("t".into()).is_transient());
        assert!(StoreError::Unavailable("u".into()).is_transient());
        assert!(StoreError::ResourceExhausted("r".into()).is_transient());
        assert!(!StoreError::ConditionFailed("c".into()).is_transient());
        assert!(!StoreError::ShardOwnershipLost { owner: "x".into() }.is_transient());
        assert!(!StoreError::Internal("i".into()).is_transient());
    }

    #[test]
    fn store_error_converts_to_shard_error() {
        let err: ShardError = StoreError::ConditionFailed("stale".into()).into();
        assert_eq!(err, ShardError::Store(StoreError::ConditionFailed("stale".into())));
    }
}
