//! Write gateway over the execution store.
//!
//! Every operation follows the same shape: check the phase gate, resolve
//! the namespace (never under the shard lock), take the exclusive lock,
//! allocate task ids, issue the store call stamped with the current range
//! id, publish the consumed max read level, and classify any error.


use tracing::warn;

use crate::backoff::{retry, RetryPolicy};
use crate::error::{ShardError, StoreError};
use crate::namespace::NamespaceEntry;
use crate::persistence::{
    AddTasksRequest, AppendHistoryNodesRequest, ConflictResolveWorkflowExecutionRequest,
    ConflictResolveWorkflowExecutionResponse, CreateWorkflowExecutionRequest,
    CreateWorkflowExecutionResponse, DeleteCurrentWorkflowExecutionRequest,
    DeleteHistoryBranchRequest, DeleteWorkflowExecutionRequest, UpdateWorkflowExecutionRequest,
    UpdateWorkflowExecutionResponse,
};
use crate::task::{Task, TaskSet, WorkflowKey};

use super::{ShardContext, ShardState};

impl ShardContext {
    pub async fn create_workflow_execution(
        &self,
        mut request: CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, ShardError> {
        self.read_lock().await.gate()?;
        let namespace = self
            .namespace_registry
            .namespace_by_id(&request.new_snapshot.key.namespace_id)?;
        let workflow_id = request.new_snapshot.key.workflow_id.clone();

        let mut st = self.write_lock().await;
        let mut max_allocated = 0;
        self.allocate_task_ids_locked(
            &mut st,
            &namespace,
            &workflow_id,
            &mut request.new_snapshot.tasks,
            &mut max_allocated,
        )
        .await?;

        request.range_id = st.range_id();
        let result = self.execution_store.create_workflow_execution(&request).await;
        self.update_max_read_level_locked(&mut st, max_allocated);
        match result {
            Ok(response) => Ok(response),
            Err(err) => Err(self.handle_store_error_locked(&mut st, err)),
        }
    }

    pub async fn update_workflow_execution(
        &self,
        mut request: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, ShardError> {
        self.read_lock().await.gate()?;
        let namespace = self
            .namespace_registry
            .namespace_by_id(&request.update_mutation.key.namespace_id)?;
        let workflow_id = request.update_mutation.key.workflow_id.clone();

        let mut st = self.write_lock().await;
        let mut max_allocated = 0;
        self.allocate_task_ids_locked(
            &mut st,
            &namespace,
            &workflow_id,
            &mut request.update_mutation.tasks,
            &mut max_allocated,
        )
        .await?;
        if let Some(snapshot) = request.new_snapshot.as_mut() {
            self.allocate_task_ids_locked(
                &mut st,
                &namespace,
                &workflow_id,
                &mut snapshot.tasks,
                &mut max_allocated,
            )
            .await?;
        }

        request.range_id = st.range_id();
        let result = self.execution_store.update_workflow_execution(&request).await;
        self.update_max_read_level_locked(&mut st, max_allocated);
        match result {
            Ok(response) => Ok(response),
            Err(err) => Err(self.handle_store_error_locked(&mut st, err)),
        }
    }

    pub async fn conflict_resolve_workflow_execution(
        &self,
        mut request: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<ConflictResolveWorkflowExecutionResponse, ShardError> {
        self.read_lock().await.gate()?;
        let namespace = self
            .namespace_registry
            .namespace_by_id(&request.reset_snapshot.key.namespace_id)?;
        let workflow_id = request.reset_snapshot.key.workflow_id.clone();

        let mut st = self.write_lock().await;
        let mut max_allocated = 0;
        if let Some(mutation) = request.current_mutation.as_mut() {
            self.allocate_task_ids_locked(
                &mut st,
                &namespace,
                &workflow_id,
                &mut mutation.tasks,
                &mut max_allocated,
            )
            .await?;
        }
        self.allocate_task_ids_locked(
            &mut st,
            &namespace,
            &workflow_id,
            &mut request.reset_snapshot.tasks,
            &mut max_allocated,
        )
        .await?;
        if let Some(snapshot) = request.new_snapshot.as_mut() {
            self.allocate_task_ids_locked(
                &mut st,
                &namespace,
                &workflow_id,
                &mut snapshot.tasks,
                &mut max_allocated,
            )
            .await?;
        }

        request.range_id = st.range_id();
        let result = self
            .execution_store
            .conflict_resolve_workflow_execution(&request)
            .await;
        self.update_max_read_level_locked(&mut st, max_allocated);
        match result {
            Ok(response) => Ok(response),
            Err(err) => Err(self.handle_store_error_locked(&mut st, err)),
        }
    }

    /// Enqueue tasks for an existing execution. On success the engine is
    /// notified of every queue that received tasks.
    pub async fn add_tasks(&self, mut request: AddTasksRequest) -> Result<(), ShardError> {
        self.read_lock().await.gate()?;
        let namespace = self
            .namespace_registry
            .namespace_by_id(&request.key.namespace_id)?;

        let mut st = self.write_lock().await;
        self.add_tasks_locked(&mut st, &mut request, &namespace).await
    }

    pub(crate) async fn add_tasks_locked(
        &self,
        st: &mut ShardState,
        request: &mut AddTasksRequest,
        namespace: &NamespaceEntry,
    ) -> Result<(), ShardError> {
        let workflow_id = request.key.workflow_id.clone();
        let mut max_allocated = 0;
        self.allocate_task_ids_locked(
            st,
            namespace,
            &workflow_id,
            &mut request.tasks,
            &mut max_allocated,
        )
        .await?;

        request.range_id = st.range_id();
        let result = self.execution_store.add_tasks(request).await;
        self.update_max_read_level_locked(st, max_allocated);
        if let Err(err) = result {
            return Err(self.handle_store_error_locked(st, err));
        }

        if let Some(engine) = st.engine.as_ref() {
            engine.notify_new_transfer_tasks(&request.tasks.transfer_tasks);
            engine.notify_new_timer_tasks(&request.tasks.timer_tasks);
            engine.notify_new_visibility_tasks(&request.tasks.visibility_tasks);
            engine.notify_new_replication_tasks(&request.tasks.replication_tasks);
        }
        Ok(())
    }

    /// Append history nodes for one execution. History is addressed by
    /// branch token rather than shard range, so no shard lock is taken and
    /// a failure does not move the state machine. Returns the encoded size.
    pub async fn append_history_events(
        &self,
        mut request: AppendHistoryNodesRequest,
        key: &WorkflowKey,
    ) -> Result<usize, ShardError> {
        self.read_lock().await.gate()?;

        request.shard_id = self.shard_id;
        let result = self.execution_store.append_history_nodes(&request).await;

        let size = result.as_ref().map(|response| response.size).unwrap_or(0);
        let namespace_name = self
            .namespace_registry
            .namespace_by_id(&key.namespace_id)
            .ok()
            .map(|entry| entry.name);
        self.metrics
            .record_history_size(&self.shard_label, namespace_name.as_deref(), size);
        if size >= self.config.history_size_log_threshold {
            warn!(
                shard_id = self.shard_id,
                namespace_id = %key.namespace_id,
                workflow_id = %key.workflow_id,
                run_id = %key.run_id,
                size_bytes = size,
                "shard: history size threshold breached"
            );
        }

        result.map(|response| response.size).map_err(ShardError::from)
    }

    /// Remove one execution entirely: current-execution pointer, execution
    /// record, optionally its history branch, and finally a visibility
    /// delete task.
    ///
    /// Only the final task enqueue runs under the shard lock; the preceding
    /// deletions are idempotent by key, so they run outside it, each under
    /// a bounded transient-error retry.
    pub async fn delete_workflow_execution(
        &self,
        key: WorkflowKey,
        branch_token: Option<Vec<u8>>,
        version: i64,
    ) -> Result<(), ShardError> {
        self.read_lock().await.gate()?;
        let namespace = self.namespace_registry.namespace_by_id(&key.namespace_id)?;

        let policy = RetryPolicy::persistence_default();

        let delete_current = DeleteCurrentWorkflowExecutionRequest {
            shard_id: self.shard_id,
            key: key.clone(),
        };
        retry(&policy, StoreError::is_transient, || {
            self.execution_store
                .delete_current_workflow_execution(&delete_current)
        })
        .await?;

        let delete_execution = DeleteWorkflowExecutionRequest {
            shard_id: self.shard_id,
            key: key.clone(),
        };
        retry(&policy, StoreError::is_transient, || {
            self.execution_store.delete_workflow_execution(&delete_execution)
        })
        .await?;

        if let Some(branch_token) = branch_token {
            let delete_branch = DeleteHistoryBranchRequest {
                shard_id: self.shard_id,
                branch_token,
            };
            retry(&policy, StoreError::is_transient, || {
                self.execution_store.delete_history_branch(&delete_branch)
            })
            .await?;
        }

        let mut request = AddTasksRequest {
            shard_id: self.shard_id,
            range_id: 0,
            key: key.clone(),
            tasks: TaskSet {
                visibility_tasks: vec![Task::new(self.time_source.now_ms(), version)],
                ..TaskSet::default()
            },
        };
        let mut st = self.write_lock().await;
        self.add_tasks_locked(&mut st, &mut request, &namespace).await
    }
}
