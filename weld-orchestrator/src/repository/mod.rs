//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Services never talk to a database directly: they open a [`Transaction`]
//! from a [`Store`] and load or save runs through it. The SQL implementation
//! lives with the REST server; [`memory::MemoryStore`] backs tests and
//! embedded use.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};

pub use memory::MemoryStore;

/// Errors raised by a store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Requested row does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Write conflicts with the stored state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure (connection, serialization, ...)
    #[error("{0}")]
    Backend(String),
}

/// Entry point of the persistence layer
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a new transaction
    ///
    /// Transactions are independent: writes become visible to other
    /// transactions only once committed.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Unit of work on the store
///
/// Dropping a transaction without committing it discards its writes.
#[async_trait]
pub trait Transaction: Send {
    /// Loads a run with all its node runs
    async fn load_run(
        &mut self,
        project_key: &str,
        workflow_name: &str,
        number: u64,
    ) -> Result<WorkflowRun, StoreError>;

    /// Loads a run with all its node runs
    async fn load_run_by_id(&mut self, id: i64) -> Result<WorkflowRun, StoreError>;

    async fn load_node_run_by_id(&mut self, id: i64) -> Result<WorkflowNodeRun, StoreError>;

    /// Latest node run of the same node in an earlier run of the workflow
    async fn load_previous_node_run(
        &mut self,
        node_run: &WorkflowNodeRun,
    ) -> Result<Option<WorkflowNodeRun>, StoreError>;

    /// Reserves the next run number of a workflow
    async fn next_run_number(
        &mut self,
        project_key: &str,
        workflow_name: &str,
    ) -> Result<u64, StoreError>;

    /// Reserves the next sub-number of a run
    ///
    /// A reservation is never handed out twice, even when the transaction
    /// that made it rolls back.
    async fn next_sub_number(&mut self, run_id: i64) -> Result<u64, StoreError>;

    /// Inserts a run and assigns its ID
    async fn insert_run(&mut self, run: &mut WorkflowRun) -> Result<(), StoreError>;

    /// Updates the run row; node runs are saved separately
    async fn update_run(&mut self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Inserts a node run and assigns its ID
    async fn insert_node_run(&mut self, node_run: &mut WorkflowNodeRun) -> Result<(), StoreError>;

    async fn update_node_run(&mut self, node_run: &WorkflowNodeRun) -> Result<(), StoreError>;

    /// Applies every staged write
    ///
    /// Fails with [`StoreError::Conflict`] when a run row written by this
    /// transaction was committed by another one since it was read.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
