//! Event Service
//!
//! Publishes what a report touched. Publication is best effort: load
//! failures are logged and the remaining items are still published.

use weld_core::domain::run::WorkflowNodeRun;

use crate::Orchestrator;
use crate::report::ProcessorReport;
use crate::repository::Transaction;

/// Publishes every run then every node run of `report`
pub async fn send_events(orch: &Orchestrator, report: &ProcessorReport, project_key: &str) {
    for run in report.runs() {
        orch.events.publish_run(&run, project_key).await;
    }

    let node_runs = report.node_runs();
    if node_runs.is_empty() {
        return;
    }

    let mut tx = match orch.store.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::warn!("Cannot open transaction to publish node runs: {}", err);
            return;
        }
    };

    for node_run in &node_runs {
        let run = match tx.load_run_by_id(node_run.workflow_run_id).await {
            Ok(run) => run,
            Err(err) => {
                tracing::warn!(
                    "Cannot load run {} of node run {}: {}",
                    node_run.workflow_run_id,
                    node_run.id,
                    err
                );
                continue;
            }
        };

        let previous = previous_node_run(tx.as_mut(), node_run).await;
        orch.events
            .publish_node_run(node_run, &run.workflow, previous.as_ref())
            .await;
    }

    if let Err(err) = tx.rollback().await {
        tracing::debug!("Rollback after publishing failed: {}", err);
    }
}

/// Node run to compare `node_run` with
///
/// A restarted node run is compared with itself; a first execution with the
/// same node in an earlier run.
async fn previous_node_run(
    tx: &mut dyn Transaction,
    node_run: &WorkflowNodeRun,
) -> Option<WorkflowNodeRun> {
    if node_run.sub_number > 0 {
        return Some(node_run.clone());
    }

    match tx.load_previous_node_run(node_run).await {
        Ok(previous) => previous,
        Err(err) => {
            tracing::warn!("Cannot load previous node run of {}: {}", node_run.id, err);
            None
        }
    }
}
