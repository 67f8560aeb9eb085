//! Stop Service
//!
//! Stopping a run stops every node run of its current sub-run that has not
//! reached an outcome, all or nothing. Stopping a single node run also
//! recomputes the run status.

use chrono::Utc;
use std::sync::Arc;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};
use weld_core::domain::status::Status;
use weld_core::domain::user::User;

use crate::Orchestrator;
use crate::error::{Result, ResultExt};
use crate::report::ProcessorReport;
use crate::repository::Transaction;
use crate::service::finish;
use crate::service::process::resync_run_status;

/// Marks a node run and its unfinished stages, jobs and steps as stopped
///
/// Node runs already in a terminal status are left alone; returns whether the
/// node run was stopped.
pub async fn stop_node_run_in(
    tx: &mut dyn Transaction,
    node_run: &mut WorkflowNodeRun,
    report: &ProcessorReport,
) -> Result<bool> {
    if node_run.status.is_terminal() {
        tracing::debug!(
            "Node run {} already {}, not stopping",
            node_run.id,
            node_run.status
        );
        return Ok(false);
    }

    for stage in &mut node_run.stages {
        for job in &mut stage.jobs {
            for step in job.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
                step.status = Status::Stopped;
            }
            if !job.status.is_terminal() {
                job.status = Status::Stopped;
            }
        }
        if !stage.status.is_terminal() {
            stage.status = Status::Stopped;
        }
    }

    node_run.status = Status::Stopped;
    node_run.done = Some(Utc::now());
    tx.update_node_run(node_run)
        .await
        .with_context(|| format!("update node run {}", node_run.id))?;
    report.add_node_run(node_run);

    tracing::info!("Node run {} ({}) stopped", node_run.id, node_run.node_name);
    Ok(true)
}

async fn stop_run_in(
    tx: &mut dyn Transaction,
    run_id: i64,
    actor: &User,
    report: &ProcessorReport,
) -> Result<WorkflowRun> {
    let mut run = tx.load_run_by_id(run_id).await.context("load run")?;
    let last_sub_number = run.last_sub_number;

    let ids: Vec<i64> = run
        .node_runs
        .values()
        .flatten()
        .filter(|nr| nr.sub_number == last_sub_number && !nr.status.is_outcome())
        .map(|nr| nr.id)
        .collect();

    for id in ids {
        if let Some(node_run) = run.node_run_mut(id) {
            stop_node_run_in(tx, node_run, report).await?;
        }
    }

    run.status = Status::Stopped;
    run.last_execution = Utc::now();
    run.add_info(format!("Workflow run stopped by {}", actor.username), false);
    tx.update_run(&run).await.context("update run")?;
    report.add_run(&run);

    Ok(run)
}

/// Stops a run
///
/// Runs in one transaction: if any node run fails to stop, nothing is saved.
#[tracing::instrument(
    skip_all,
    fields(project = %run.project_key, workflow = %run.workflow_name, number = run.number)
)]
pub async fn stop_run(
    orch: &Orchestrator,
    run: &WorkflowRun,
    actor: &User,
) -> Result<Arc<ProcessorReport>> {
    let report = Arc::new(ProcessorReport::new());
    let mut tx = orch.store.begin().await.context("begin stop run")?;

    let result = stop_run_in(tx.as_mut(), run.id, actor, &report).await;
    finish(tx, result).await?;

    tracing::info!(
        "Workflow run {}#{} stopped by {}",
        run.workflow_name,
        run.number,
        actor.username
    );
    Ok(report)
}

async fn stop_node_run_tx(
    tx: &mut dyn Transaction,
    node_run_id: i64,
    report: &ProcessorReport,
) -> Result<()> {
    let mut node_run = tx
        .load_node_run_by_id(node_run_id)
        .await
        .context("load node run")?;
    stop_node_run_in(tx, &mut node_run, report).await?;

    let mut run = tx
        .load_run_by_id(node_run.workflow_run_id)
        .await
        .context("reload run")?;
    resync_run_status(tx, &mut run, report).await?;
    Ok(())
}

/// Stops one node run and resynchronizes its run status
#[tracing::instrument(skip(orch, actor))]
pub async fn stop_node_run(
    orch: &Orchestrator,
    node_run_id: i64,
    actor: &User,
) -> Result<Arc<ProcessorReport>> {
    let report = Arc::new(ProcessorReport::new());
    let mut tx = orch.store.begin().await.context("begin stop node run")?;

    let result = stop_node_run_tx(tx.as_mut(), node_run_id, &report).await;
    finish(tx, result).await?;

    tracing::info!("Node run {} stopped by {}", node_run_id, actor.username);
    Ok(report)
}
