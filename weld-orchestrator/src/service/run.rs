//! Run Start Service
//!
//! Starting a run either creates a fresh run (hook or manual trigger) or
//! restarts some nodes of an existing run. Restarted nodes are processed
//! concurrently, one branch per node, each in its own transaction. Branch
//! transactions are only committed once every branch has succeeded, so a
//! single failing branch leaves the store untouched.
//!
//! The run row is committed before the branches: a concurrent restart of the
//! same run fails with a store conflict there, before any node run is saved.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use weld_core::domain::project::Project;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};
use weld_core::domain::status::Status;
use weld_core::domain::trigger::ManualTrigger;
use weld_core::domain::user::{PermissionLevel, User};
use weld_core::domain::workflow::{Node, Workflow};
use weld_core::dto::run::RunRequest;

use crate::Orchestrator;
use crate::error::{Error, Result, ResultExt};
use crate::report::ProcessorReport;
use crate::repository::{StoreError, Transaction};
use crate::service::finish;
use crate::service::process::{self, NodeRunTrigger};

/// Work of one branch, staged in a transaction that is not committed yet
struct Branch {
    tx: Box<dyn Transaction>,
    report: ProcessorReport,
    node_run: WorkflowNodeRun,
}

/// Starts a run and returns everything it created
pub async fn start_run(
    orch: &Orchestrator,
    project: &Project,
    workflow: &Workflow,
    request: RunRequest,
    actor: &User,
) -> Result<Arc<ProcessorReport>> {
    let report = Arc::new(ProcessorReport::new());
    start_run_with_report(orch, project, workflow, request, actor, Arc::clone(&report)).await?;
    Ok(report)
}

/// Starts a run, recording into a report owned by the caller
///
/// On failure the report still holds every branch error, in the order the
/// branches reported them; the returned error is the first one.
#[tracing::instrument(
    skip_all,
    fields(project = %project.key, workflow = %workflow.name, number = ?request.number)
)]
pub async fn start_run_with_report(
    orch: &Orchestrator,
    project: &Project,
    workflow: &Workflow,
    request: RunRequest,
    actor: &User,
    report: Arc<ProcessorReport>,
) -> Result<()> {
    let timeout = orch.config.run_start_timeout;
    match tokio::time::timeout(timeout, start(orch, project, workflow, request, actor, &report))
        .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Run start abandoned after {:?}", timeout);
            Err(Error::Timeout(timeout))
        }
    }
}

async fn start(
    orch: &Orchestrator,
    project: &Project,
    workflow: &Workflow,
    request: RunRequest,
    actor: &User,
    report: &Arc<ProcessorReport>,
) -> Result<()> {
    let mut tx = orch.store.begin().await.context("begin run start")?;

    if let Some(hook) = request.hook {
        let result = process::run_from_hook(tx.as_mut(), project, workflow, hook, report).await;
        finish(tx, result).await?;
        return Ok(());
    }

    let manual_request = request.manual.unwrap_or_default();
    let manual = ManualTrigger {
        user: actor.for_trigger(),
        payload: manual_request.payload,
        pipeline_parameters: manual_request.pipeline_parameters,
    };

    let prepared = prepare(
        orch,
        tx.as_mut(),
        project,
        workflow,
        request.number,
        &request.from_node_ids,
        &manual,
        report,
    )
    .await;
    let (previous, branches) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return finish(tx, Err(err)).await,
    };

    let created = ProcessorReport::new();
    let result = match previous {
        Some(run) => record_restart(tx.as_mut(), run, &branches, actor, &created).await,
        None => process::manual_run(tx.as_mut(), project, workflow, manual, &created)
            .await
            .map(|_| ()),
    };
    if let Err(err) = result {
        rollback_all(branches).await;
        return finish(tx, Err(err)).await;
    }

    if let Err(err) = tx.commit().await {
        rollback_all(branches).await;
        return Err::<(), _>(err).context("commit run");
    }
    report.merge(&created);

    let mut pending = branches.into_iter();
    while let Some(branch) = pending.next() {
        if let Err(err) = branch.tx.commit().await {
            tracing::error!(
                "Commit of branch {} failed, discarding the remaining branches",
                branch.node_run.node_name
            );
            rollback_all(pending.collect()).await;
            return Err::<(), _>(err)
                .with_context(|| format!("commit branch {}", branch.node_run.node_name));
        }
        report.merge(&branch.report);
    }

    Ok(())
}

/// Resolves the from-nodes and runs one branch per node
///
/// Returns the previous run, if any, with a freshly reserved sub-number, and
/// the staged branches. Branch errors are added to `report`; fails with the
/// first of them if any branch failed.
#[allow(clippy::too_many_arguments)]
async fn prepare(
    orch: &Orchestrator,
    tx: &mut dyn Transaction,
    project: &Project,
    workflow: &Workflow,
    number: Option<u64>,
    from_node_ids: &[i64],
    manual: &ManualTrigger,
    report: &Arc<ProcessorReport>,
) -> Result<(Option<WorkflowRun>, Vec<Branch>)> {
    let mut previous = match number {
        Some(number) => Some(load_previous_run(tx, workflow, number).await?),
        None => None,
    };

    let graph = previous.as_ref().map_or(workflow, |run| &run.workflow);
    let from_nodes = resolve_from_nodes(graph, from_node_ids, previous.is_some())?;

    if let Some(run) = previous.as_mut() {
        run.last_sub_number = tx
            .next_sub_number(run.id)
            .await
            .context("reserve sub-number")?;
    }

    let outcome = Arc::new(ProcessorReport::new());
    let branches = run_branches(orch, project, from_nodes, previous.as_ref(), manual, &outcome).await;
    report.merge(&outcome);

    if let Some(first) = outcome.first_error() {
        tracing::warn!(
            "{} branch(es) failed, discarding {} staged branch(es)",
            outcome.errors().len(),
            branches.len()
        );
        rollback_all(branches).await;
        return Err(Error::from_shared(first));
    }

    Ok((previous, branches))
}

async fn load_previous_run(
    tx: &mut dyn Transaction,
    workflow: &Workflow,
    number: u64,
) -> Result<WorkflowRun> {
    tx.load_run(&workflow.project_key, &workflow.name, number)
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => Error::RunNotFound(format!(
                "{}/{}#{}",
                workflow.project_key, workflow.name, number
            )),
            other => Error::from(other),
        })
}

fn resolve_from_nodes(
    graph: &Workflow,
    from_node_ids: &[i64],
    has_previous: bool,
) -> Result<Vec<Node>> {
    if from_node_ids.is_empty() {
        let root = graph.root().ok_or(Error::NodeNotFound(graph.root_id))?;
        return Ok(vec![root.clone()]);
    }

    if !has_previous {
        return Err(Error::wrong_request(
            "restarting from nodes requires a run number",
        ));
    }

    let mut nodes: Vec<Node> = Vec::with_capacity(from_node_ids.len());
    for &id in from_node_ids {
        if nodes.iter().any(|n| n.id == id) {
            continue;
        }
        let node = graph.node(id).ok_or(Error::NodeNotFound(id))?;
        nodes.push(node.clone());
    }
    Ok(nodes)
}

/// Spawns every branch and waits for all of them
///
/// Failures are recorded in `report`; only successful branches are returned.
async fn run_branches(
    orch: &Orchestrator,
    project: &Project,
    from_nodes: Vec<Node>,
    previous: Option<&WorkflowRun>,
    manual: &ManualTrigger,
    report: &Arc<ProcessorReport>,
) -> Vec<Branch> {
    let limiter = Arc::new(Semaphore::new(orch.config.max_parallel_branches));
    let mut tasks = JoinSet::new();

    for node in from_nodes {
        let orch = orch.clone();
        let project = project.clone();
        let run = previous.cloned();
        let manual = manual.clone();
        let limiter = Arc::clone(&limiter);
        let report = Arc::clone(report);

        tasks.spawn(
            async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        report.add_error(Error::internal("branch limiter closed"));
                        return None;
                    }
                };

                match run_branch(&orch, &project, &node, run.as_ref(), manual)
                    .await
                    .with_context(|| format!("start from node {}", node.name))
                {
                    Ok(branch) => branch,
                    Err(err) => {
                        tracing::warn!("Branch {} failed: {}", node.name, err);
                        report.add_error(err);
                        None
                    }
                }
            }
            .in_current_span(),
        );
    }

    let mut branches = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(branch)) => branches.push(branch),
            Ok(None) => {}
            Err(err) => {
                report.add_error(Error::internal(format!("branch task failed: {}", err)));
            }
        }
    }
    branches
}

async fn run_branch(
    orch: &Orchestrator,
    project: &Project,
    node: &Node,
    run: Option<&WorkflowRun>,
    manual: ManualTrigger,
) -> Result<Option<Branch>> {
    if let Some(environment) = node.environment() {
        let allowed = orch
            .permissions
            .access_to_environment(
                &project.key,
                &environment.name,
                &manual.user,
                PermissionLevel::ReadExecute,
            )
            .await;
        if !allowed {
            return Err(Error::NoEnvExecution {
                user: manual.user.username.clone(),
                environment: environment.name.clone(),
            });
        }
    }

    let trigger = NodeRunTrigger::manual(manual, node);

    // A fresh run is created once, after the barrier
    let Some(run) = run else {
        return Ok(None);
    };

    let mut tx = orch.store.begin().await.context("begin branch")?;
    let report = ProcessorReport::new();
    match process::manual_run_from_node(tx.as_mut(), project, run, node.id, trigger, &report).await
    {
        Ok(node_run) => Ok(Some(Branch {
            tx,
            report,
            node_run,
        })),
        Err(err) => finish(tx, Err(err)).await,
    }
}

/// Records the restarted node runs on the run row, in the outer transaction
async fn record_restart(
    tx: &mut dyn Transaction,
    mut run: WorkflowRun,
    branches: &[Branch],
    actor: &User,
    report: &ProcessorReport,
) -> Result<()> {
    for branch in branches {
        run.push_node_run(branch.node_run.clone());
    }

    let names: Vec<&str> = branches
        .iter()
        .map(|b| b.node_run.node_name.as_str())
        .collect();
    run.status = Status::Building;
    run.last_execution = Utc::now();
    run.add_info(
        format!(
            "Workflow run {}.{} restarted by {} from {}",
            run.number,
            run.last_sub_number,
            actor.username,
            names.join(", ")
        ),
        false,
    );

    tx.update_run(&run).await.context("update run")?;
    report.add_run(&run);

    tracing::info!(
        "Workflow run {}/{}#{}.{} restarted from {} node(s)",
        run.project_key,
        run.workflow_name,
        run.number,
        run.last_sub_number,
        branches.len()
    );
    Ok(())
}

async fn rollback_all(branches: Vec<Branch>) {
    for branch in branches {
        if let Err(err) = branch.tx.rollback().await {
            tracing::warn!(
                "Rollback of branch {} failed: {}",
                branch.node_run.node_name,
                err
            );
        }
    }
}
