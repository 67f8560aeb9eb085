//! Event publication
//!
//! Runs and node runs touched by an operation are pushed to an event bus once
//! the operation commits. [`LogPublisher`] is the default publisher and writes
//! events as tracing records.

use async_trait::async_trait;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};
use weld_core::domain::workflow::Workflow;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_run(&self, run: &WorkflowRun, project_key: &str);

    /// Publishes a node run along with the node run it follows, if any
    async fn publish_node_run(
        &self,
        node_run: &WorkflowNodeRun,
        workflow: &Workflow,
        previous: Option<&WorkflowNodeRun>,
    );
}

/// Publisher writing events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish_run(&self, run: &WorkflowRun, project_key: &str) {
        tracing::info!(
            project = project_key,
            workflow = %run.workflow_name,
            number = run.number,
            status = %run.status,
            "Workflow run event"
        );
    }

    async fn publish_node_run(
        &self,
        node_run: &WorkflowNodeRun,
        workflow: &Workflow,
        previous: Option<&WorkflowNodeRun>,
    ) {
        tracing::info!(
            project = %workflow.project_key,
            workflow = %workflow.name,
            node = %node_run.node_name,
            run = %format!("{}.{}", node_run.number, node_run.sub_number),
            status = %node_run.status,
            previous_status = ?previous.map(|p| p.status),
            "Workflow node run event"
        );
    }
}
