//! Durable-store collaborator interfaces.
//!
//! The shard context drives two stores: the shard-metadata store (one
//! record per shard, conditionally updated on the lease generation) and the
//! execution store (workflow state, task queues, history nodes). Every
//! write request that mutates shard-owned data carries the caller's
//! `range_id` and must be rejected by the store when it does not match the
//! stored one.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::shard_info::ShardInfo;
use crate::task::{TaskSet, WorkflowKey};

#[derive(Debug, Clone)]
pub struct GetOrCreateShardRequest {
    pub shard_id: i32,
    pub create_if_missing: bool,
}

#[derive(Debug, Clone)]
pub struct GetOrCreateShardResponse {
    pub shard_info: ShardInfo,
}

/// Conditional update: the store must apply `shard_info` only if the
/// stored record's range id equals `previous_range_id`, and report
/// [`StoreError::ShardOwnershipLost`] otherwise.
#[derive(Debug, Clone)]
pub struct UpdateShardRequest {
    pub shard_info: ShardInfo,
    pub previous_range_id: i64,
}

#[async_trait]
pub trait ShardStore: Send + Sync {
    async fn get_or_create_shard(
        &self,
        request: GetOrCreateShardRequest,
    ) -> Result<GetOrCreateShardResponse, StoreError>;

    async fn update_shard(&self, request: UpdateShardRequest) -> Result<(), StoreError>;
}

/// New workflow state plus the tasks that must land atomically with it.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSnapshot {
    pub key: WorkflowKey,
    pub tasks: TaskSet,
}

#[derive(Debug, Clone, Default)]
pub struct CreateWorkflowExecutionRequest {
    pub range_id: i64,
    pub new_snapshot: WorkflowSnapshot,
}

#[derive(Debug, Clone, Default)]
pub struct CreateWorkflowExecutionResponse {}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflowExecutionRequest {
    pub range_id: i64,
    pub update_mutation: WorkflowSnapshot,
    pub new_snapshot: Option<WorkflowSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflowExecutionResponse {}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolveWorkflowExecutionRequest {
    pub range_id: i64,
    pub current_mutation: Option<WorkflowSnapshot>,
    pub reset_snapshot: WorkflowSnapshot,
    pub new_snapshot: Option<WorkflowSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolveWorkflowExecutionResponse {}

#[derive(Debug, Clone, Default)]
pub struct AddTasksRequest {
    pub shard_id: i32,
    pub range_id: i64,
    pub key: WorkflowKey,
    pub tasks: TaskSet,
}

/// History nodes are addressed by branch token, not by shard range, so this
/// request carries no `range_id`.
#[derive(Debug, Clone, Default)]
pub struct AppendHistoryNodesRequest {
    pub shard_id: i32,
    pub branch_token: Vec<u8>,
    pub events: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct AppendHistoryNodesResponse {
    /// Encoded size of the appended nodes, in bytes.
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct DeleteCurrentWorkflowExecutionRequest {
    pub shard_id: i32,
    pub key: WorkflowKey,
}

#[derive(Debug, Clone)]
pub struct DeleteWorkflowExecutionRequest {
    pub shard_id: i32,
    pub key: WorkflowKey,
}

#[derive(Debug, Clone)]
pub struct DeleteHistoryBranchRequest {
    pub shard_id: i32,
    pub branch_token: Vec<u8>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_workflow_execution(
        &self,
        request: &CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, StoreError>;

    async fn update_workflow_execution(
        &self,
        request: &UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, StoreError>;

    async fn conflict_resolve_workflow_execution(
        &self,
        request: &ConflictResolveWorkflowExecutionRequest,
    ) -> Result<ConflictResolveWorkflowExecutionResponse, StoreError>;

    async fn add_tasks(&self, request: &AddTasksRequest) -> Result<(), StoreError>;

    async fn append_history_nodes(
        &self,
        request: &AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, StoreError>;

    async fn delete_current_workflow_execution(
        &self,
        request: &DeleteCurrentWorkflowExecutionRequest,
    ) -> Result<(), StoreError>;

    async fn delete_workflow_execution(
        &self,
        request: &DeleteWorkflowExecutionRequest,
    ) -> Result<(), StoreError>;

    async fn delete_history_branch(
        &self,
        request: &DeleteHistoryBranchRequest,
    ) -> Result<(), StoreError>;
}
