//! Run Processing Service
//!
//! Creation of runs and node runs, and recomputation of a run status from its
//! node runs. Every routine works inside the caller's transaction and records
//! what it touched in the caller's report.

use chrono::Utc;
use std::collections::BTreeMap;
use weld_core::domain::parameter::Parameter;
use weld_core::domain::project::Project;
use weld_core::domain::run::{JobRun, Stage, StepStatus, VcsInfo, WorkflowNodeRun, WorkflowRun};
use weld_core::domain::status::Status;
use weld_core::domain::trigger::{HookEvent, ManualTrigger};
use weld_core::domain::workflow::{Node, Workflow};

use crate::error::{Error, Result, ResultExt};
use crate::report::ProcessorReport;
use crate::repository::Transaction;
use crate::service::parameters::resolve_fixed_run_parameters;
use crate::service::{inherit, payload};

/// What a new node run is started with
#[derive(Debug, Clone, Default)]
pub struct NodeRunTrigger {
    pub manual: Option<ManualTrigger>,
    pub hook_event: Option<HookEvent>,
    pub payload: serde_json::Value,
    pub pipeline_parameters: Vec<Parameter>,
}

impl NodeRunTrigger {
    /// Manual trigger, falling back to the node defaults for what the user left out
    pub fn manual(manual: ManualTrigger, node: &Node) -> Self {
        let payload = manual
            .payload
            .clone()
            .or_else(|| node.context.default_payload.clone())
            .unwrap_or(serde_json::Value::Null);
        let pipeline_parameters = if manual.pipeline_parameters.is_empty() {
            node.context.default_pipeline_parameters.clone()
        } else {
            manual.pipeline_parameters.clone()
        };

        Self {
            manual: Some(manual),
            hook_event: None,
            payload,
            pipeline_parameters,
        }
    }

    /// Hook trigger: the hook payload is merged over the node default payload
    pub fn hook(hook: HookEvent, node: &Node) -> Self {
        let mut payload = match node.context.default_payload.clone() {
            Some(serde_json::Value::Object(fields)) => fields,
            _ => serde_json::Map::new(),
        };
        if let serde_json::Value::Object(fields) = hook.payload_value() {
            payload.extend(fields);
        }

        Self {
            manual: None,
            hook_event: Some(hook),
            payload: serde_json::Value::Object(payload),
            pipeline_parameters: node.context.default_pipeline_parameters.clone(),
        }
    }
}

// ============================================================================
// Run creation
// ============================================================================

async fn create_run(tx: &mut dyn Transaction, workflow: &Workflow) -> Result<WorkflowRun> {
    let number = tx
        .next_run_number(&workflow.project_key, &workflow.name)
        .await
        .context("reserve run number")?;
    let mut run = WorkflowRun::new(workflow.clone(), number);
    tx.insert_run(&mut run).await.context("insert run")?;
    Ok(run)
}

/// Starts a fresh run of `workflow` at its root node
pub async fn manual_run(
    tx: &mut dyn Transaction,
    project: &Project,
    workflow: &Workflow,
    manual: ManualTrigger,
    report: &ProcessorReport,
) -> Result<WorkflowRun> {
    let root = workflow
        .root()
        .ok_or(Error::NodeNotFound(workflow.root_id))?;

    let mut run = create_run(tx, workflow).await?;
    run.add_info(
        format!("Workflow started manually by {}", manual.user.username),
        false,
    );

    let trigger = NodeRunTrigger::manual(manual, root);
    let node_run = create_node_run(tx, project, &run, root, 0, trigger, Vec::new()).await?;
    run.push_node_run(node_run.clone());
    report.add_node_run(&node_run);

    tx.update_run(&run).await.context("update run")?;
    report.add_run(&run);

    tracing::info!(
        "Workflow run {}/{}#{} created",
        run.project_key,
        run.workflow_name,
        run.number
    );

    Ok(run)
}

/// Starts a fresh run at the node owning the hook
pub async fn run_from_hook(
    tx: &mut dyn Transaction,
    project: &Project,
    workflow: &Workflow,
    hook: HookEvent,
    report: &ProcessorReport,
) -> Result<WorkflowRun> {
    let (node, model) = workflow
        .hook(hook.hook_uuid)
        .map(|(node, h)| (node, h.model.clone()))
        .ok_or(Error::HookNotFound(hook.hook_uuid))?;

    let mut run = create_run(tx, workflow).await?;
    run.add_info(format!("Workflow started by hook {}", model), false);

    let trigger = NodeRunTrigger::hook(hook, node);
    let node_run = create_node_run(tx, project, &run, node, 0, trigger, Vec::new()).await?;
    run.push_node_run(node_run.clone());
    report.add_node_run(&node_run);

    tx.update_run(&run).await.context("update run")?;
    report.add_run(&run);

    tracing::info!(
        "Workflow run {}/{}#{} created from hook {}",
        run.project_key,
        run.workflow_name,
        run.number,
        model
    );

    Ok(run)
}

/// Restarts `node_id` in an existing run, at the run's current sub-number
///
/// The run row is left untouched; the caller owns it. Parent node runs are
/// the latest node runs of the node's parents.
pub async fn manual_run_from_node(
    tx: &mut dyn Transaction,
    project: &Project,
    run: &WorkflowRun,
    node_id: i64,
    trigger: NodeRunTrigger,
    report: &ProcessorReport,
) -> Result<WorkflowNodeRun> {
    let node = run
        .workflow
        .node(node_id)
        .ok_or(Error::NodeNotFound(node_id))?;

    let sources: Vec<i64> = run
        .workflow
        .parents(node_id)
        .iter()
        .filter_map(|parent| run.latest_node_run(parent.id))
        .map(|nr| nr.id)
        .collect();

    let node_run = create_node_run(
        tx,
        project,
        run,
        node,
        run.last_sub_number,
        trigger,
        sources,
    )
    .await?;
    report.add_node_run(&node_run);

    tracing::info!(
        "Node {} restarted in run {}/{}#{}.{}",
        node.name,
        run.project_key,
        run.workflow_name,
        run.number,
        run.last_sub_number
    );

    Ok(node_run)
}

// ============================================================================
// Node run creation
// ============================================================================

fn instantiate_stages(workflow: &Workflow, node: &Node) -> Result<Vec<Stage>> {
    let pipeline = workflow
        .pipeline(node.pipeline_id)
        .ok_or(Error::PipelineNotFound(node.pipeline_id))?;

    Ok(pipeline
        .stages
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            let status = if i == 0 { Status::Building } else { Status::Waiting };
            Stage {
                name: stage.name.clone(),
                status,
                jobs: stage
                    .jobs
                    .iter()
                    .map(|job| JobRun {
                        name: job.name.clone(),
                        status,
                        steps: job
                            .steps
                            .iter()
                            .enumerate()
                            .map(|(order, step)| StepStatus {
                                step_order: order,
                                name: step.clone(),
                                status: Status::Waiting,
                            })
                            .collect(),
                        spawn_infos: Vec::new(),
                    })
                    .collect(),
            }
        })
        .collect())
}

/// Derives the VCS coordinates of a new node run
///
/// Payload `git.*` keys win; missing values come from parent node runs built
/// on the same repository, then from the application default branch.
async fn derive_vcs(
    tx: &mut dyn Transaction,
    node: &Node,
    flat_payload: &BTreeMap<String, String>,
    sources: &[i64],
) -> Result<VcsInfo> {
    let Some(app) = node.application() else {
        return Ok(VcsInfo::default());
    };

    let from_payload = |key: &str| flat_payload.get(key).cloned().unwrap_or_default();
    let mut vcs = VcsInfo {
        server: app.vcs_server.clone(),
        repository: app.repository_fullname.clone(),
        branch: from_payload("git.branch"),
        hash: from_payload("git.hash"),
        tag: from_payload("git.tag"),
    };

    for &id in sources {
        if !vcs.branch.is_empty() && !vcs.hash.is_empty() {
            break;
        }
        let parent = tx
            .load_node_run_by_id(id)
            .await
            .with_context(|| format!("load source node run {}", id))?;
        if parent.vcs.repository != vcs.repository {
            continue;
        }
        if vcs.branch.is_empty() {
            vcs.branch = parent.vcs.branch.clone();
        }
        if vcs.hash.is_empty() && parent.vcs.branch == vcs.branch {
            vcs.hash = parent.vcs.hash.clone();
        }
        if vcs.tag.is_empty() {
            vcs.tag = parent.vcs.tag.clone();
        }
    }

    if vcs.branch.is_empty() {
        vcs.branch = app.repository_strategy.default_branch.clone();
    }

    Ok(vcs)
}

/// Creates and inserts a node run of `node` in `run`
pub async fn create_node_run(
    tx: &mut dyn Transaction,
    project: &Project,
    run: &WorkflowRun,
    node: &Node,
    sub_number: u64,
    trigger: NodeRunTrigger,
    sources: Vec<i64>,
) -> Result<WorkflowNodeRun> {
    let mut node_run = WorkflowNodeRun {
        id: 0,
        workflow_run_id: run.id,
        workflow_id: run.workflow_id,
        node_id: node.id,
        node_name: node.name.clone(),
        number: run.number,
        sub_number,
        status: Status::Building,
        start: Utc::now(),
        done: None,
        manual: trigger.manual,
        hook_event: trigger.hook_event,
        payload: trigger.payload,
        pipeline_parameters: trigger.pipeline_parameters,
        build_parameters: Default::default(),
        source_node_runs: sources,
        vcs: VcsInfo::default(),
        stages: instantiate_stages(&run.workflow, node)?,
        artifacts: Vec::new(),
    };

    let resolved = resolve_fixed_run_parameters(project, run, &node_run)?;
    if !resolved.errors.is_empty() {
        tracing::warn!(
            "Node {} of run {}#{}: {}",
            node.name,
            run.workflow_name,
            run.number,
            resolved.errors
        );
    }
    let mut params = resolved.parameters;

    let flat_payload = payload::flatten(&node_run.payload);
    params.merge(
        inherit::inherit_parent_parameters(
            tx,
            &run.workflow,
            &node_run.source_node_runs,
            &flat_payload,
        )
        .await?,
    );

    node_run.vcs = derive_vcs(tx, node, &flat_payload, &node_run.source_node_runs).await?;
    for (key, value) in [
        ("git.repository", &node_run.vcs.repository),
        ("git.branch", &node_run.vcs.branch),
        ("git.hash", &node_run.vcs.hash),
        ("git.tag", &node_run.vcs.tag),
    ] {
        if !value.is_empty() {
            params.add(key, value.clone());
        }
    }
    node_run.build_parameters = params;

    tx.insert_node_run(&mut node_run)
        .await
        .with_context(|| format!("insert node run of {}", node.name))?;

    tracing::debug!(
        "Node run {} created for {} ({}.{})",
        node_run.id,
        node.name,
        node_run.number,
        node_run.sub_number
    );

    Ok(node_run)
}

// ============================================================================
// Status
// ============================================================================

/// Aggregate status of a run, computed from the latest node run of each node
pub fn compute_run_status(run: &WorkflowRun) -> Status {
    let statuses: Vec<Status> = run.latest_node_runs().map(|nr| nr.status).collect();
    let any = |wanted: &[Status]| statuses.iter().any(|s| wanted.contains(s));

    if any(&[Status::Building, Status::Waiting]) {
        Status::Building
    } else if any(&[Status::Fail]) {
        Status::Fail
    } else if any(&[Status::Stopped]) {
        Status::Stopped
    } else if any(&[Status::Success]) {
        Status::Success
    } else if any(&[Status::Skipped, Status::Disabled]) {
        Status::Skipped
    } else {
        Status::NeverBuilt
    }
}

/// Recomputes the run status and saves the run when it changed
///
/// Returns true when the status changed.
pub async fn resync_run_status(
    tx: &mut dyn Transaction,
    run: &mut WorkflowRun,
    report: &ProcessorReport,
) -> Result<bool> {
    let status = compute_run_status(run);
    if status == run.status {
        tracing::debug!(
            "Run {}#{} already {}",
            run.workflow_name,
            run.number,
            status
        );
        return Ok(false);
    }

    tracing::info!(
        "Run {}#{} status {} -> {}",
        run.workflow_name,
        run.number,
        run.status,
        status
    );
    run.status = status;
    run.last_execution = Utc::now();
    tx.update_run(run).await.context("update run status")?;
    report.add_run(run);

    Ok(true)
}
