//! Commit Status Service
//!
//! Reconciles the commit statuses published on VCS providers with the node
//! runs of a run. A status is only (re)published when the remote one is
//! missing, still building, or disagrees with the local outcome. Provider
//! failures are logged and never stop the reconciliation of other nodes.

use chrono::Utc;
use std::sync::Arc;
use weld_core::domain::project::Project;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};
use weld_core::domain::status::Status;
use weld_core::domain::vcs::{CommitStatus, StatusEvent};
use weld_core::domain::workflow::{Node, Workflow};

use crate::Orchestrator;
use crate::gateway::VcsClient;
use crate::gateway::vcs::VcsError;

/// Description identifying the status of one node on the provider
pub fn status_description(prefix: &str, project_key: &str, workflow: &str, node: &str) -> String {
    format!("{}/{}/{}/{}", prefix, project_key, workflow, node)
}

/// Decides whether the local status must be published over `found`
pub fn needs_publish(found: Option<&CommitStatus>, local: Status) -> bool {
    let Some(found) = found else {
        return true;
    };
    if found.state.trim().is_empty() {
        return true;
    }

    match Status::parse_remote(&found.state) {
        Some(Status::Building) => true,
        Some(Status::Success) => local != Status::Success,
        Some(Status::Fail) => local != Status::Fail,
        Some(Status::Skipped) => !matches!(
            local,
            Status::Disabled | Status::NeverBuilt | Status::Skipped
        ),
        _ => false,
    }
}

/// Publishes the commit status of every finished node run that needs it
///
/// Returns the IDs of the node runs whose status was published.
#[tracing::instrument(
    skip_all,
    fields(project = %project.key, workflow = %run.workflow_name, number = run.number)
)]
pub async fn resync_commit_status(
    orch: &Orchestrator,
    project: &Project,
    run: &WorkflowRun,
) -> Vec<i64> {
    let mut published = Vec::new();

    for &node_id in run.node_runs.keys() {
        let Some(node_run) = run.latest_node_run(node_id) else {
            continue;
        };
        if !node_run.status.is_terminal() {
            tracing::debug!("Node run {} still {}, skipping", node_run.id, node_run.status);
            continue;
        }
        let Some(node) = run.workflow.node(node_id) else {
            continue;
        };
        if !node.is_linked_to_repo() {
            continue;
        }
        let Some(server) = project.vcs_server(&node_run.vcs.server) else {
            tracing::debug!(
                "No VCS server {} on project {}, skipping node {}",
                node_run.vcs.server,
                project.key,
                node.name
            );
            continue;
        };

        let client = match orch.vcs.client(server).await {
            Ok(client) => client,
            Err(err) => {
                tracing::error!("Cannot get VCS client for {}: {}", server.name, err);
                continue;
            }
        };

        let statuses = match client
            .list_statuses(&node_run.vcs.repository, node_run.vcs.reference())
            .await
        {
            Ok(statuses) => statuses,
            Err(err) => {
                tracing::error!(
                    "Cannot list statuses of {}@{}: {}",
                    node_run.vcs.repository,
                    node_run.vcs.reference(),
                    err
                );
                continue;
            }
        };

        let description = status_description(
            &orch.config.commit_status_prefix,
            &project.key,
            &run.workflow_name,
            &node.name,
        );
        let found = statuses.iter().find(|s| s.description == description);
        if !needs_publish(found, node_run.status) {
            tracing::debug!("Status of {} already in sync", description);
            continue;
        }

        match send_status(&client, project, &run.workflow, node, node_run, description).await {
            Ok(()) => published.push(node_run.id),
            Err(err) => tracing::error!("Cannot publish status of node {}: {}", node.name, err),
        }
    }

    published
}

/// Publishes one status and comments matching pull requests on failure
async fn send_status(
    client: &Arc<dyn VcsClient>,
    project: &Project,
    workflow: &Workflow,
    node: &Node,
    node_run: &WorkflowNodeRun,
    description: String,
) -> Result<(), VcsError> {
    let event = StatusEvent {
        project_key: project.key.clone(),
        workflow_name: workflow.name.clone(),
        pipeline_name: workflow
            .pipeline(node.pipeline_id)
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        application_name: node.application().map(|a| a.name.clone()).unwrap_or_default(),
        environment_name: node.environment().map(|e| e.name.clone()),
        node_name: node.name.clone(),
        node_run_id: node_run.id,
        number: node_run.number,
        sub_number: node_run.sub_number,
        status: node_run.status,
        hash: node_run.vcs.hash.clone(),
        tag: node_run.vcs.tag.clone(),
        branch: node_run.vcs.branch.clone(),
        repository_manager: node_run.vcs.server.clone(),
        repository_fullname: node_run.vcs.repository.clone(),
        description,
        stages: node_run.stage_summaries(),
        timestamp: Utc::now(),
    };

    client.set_status(&event).await?;
    tracing::info!(
        "Status {} published for {} on {}",
        node_run.status,
        event.description,
        event.repository_fullname
    );

    if node_run.status != Status::Fail {
        return Ok(());
    }

    let pull_requests = match client.pull_requests(&node_run.vcs.repository).await {
        Ok(prs) => prs,
        Err(err) => {
            tracing::warn!(
                "Cannot list pull requests of {}: {}",
                node_run.vcs.repository,
                err
            );
            return Ok(());
        }
    };

    let report = node_run.report();
    for pr in pull_requests.iter().filter(|pr| {
        pr.head.branch == node_run.vcs.branch && pr.head.latest_commit == node_run.vcs.hash
    }) {
        if let Err(err) = client
            .pull_request_comment(&node_run.vcs.repository, pr.id, &report)
            .await
        {
            tracing::warn!("Cannot comment pull request #{}: {}", pr.id, err);
        }
    }

    Ok(())
}
