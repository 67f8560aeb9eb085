//! Run domain types
//!
//! A [`WorkflowRun`] is one execution of a workflow. Every node executed in the
//! run gets one [`WorkflowNodeRun`] per sub-run; partial re-runs bump the run's
//! `last_sub_number` and create new node runs with that sub-number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::domain::parameter::{Parameter, ParameterSet};
use crate::domain::status::Status;
use crate::domain::trigger::{HookEvent, ManualTrigger};
use crate::domain::vcs::StageSummary;
use crate::domain::workflow::Workflow;

/// Entry of the run information log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub at: DateTime<Utc>,
    pub message: String,
    pub is_error: bool,
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Storage identifier, assigned on insert
    pub id: i64,
    pub number: u64,
    pub project_key: String,
    pub workflow_name: String,
    pub workflow_id: i64,
    /// Snapshot of the workflow at run creation
    pub workflow: Workflow,
    pub status: Status,
    pub last_sub_number: u64,
    pub start: DateTime<Utc>,
    pub last_execution: DateTime<Utc>,
    /// Node runs keyed by node ID, highest sub-number first
    #[serde(default)]
    pub node_runs: BTreeMap<i64, Vec<WorkflowNodeRun>>,
    #[serde(default)]
    pub infos: Vec<RunInfo>,
}

impl WorkflowRun {
    /// Creates an unsaved run for `workflow`
    pub fn new(workflow: Workflow, number: u64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            number,
            project_key: workflow.project_key.clone(),
            workflow_name: workflow.name.clone(),
            workflow_id: workflow.id,
            workflow,
            status: Status::Building,
            last_sub_number: 0,
            start: now,
            last_execution: now,
            node_runs: BTreeMap::new(),
            infos: Vec::new(),
        }
    }

    /// Appends a message to the run information log
    pub fn add_info(&mut self, message: impl Into<String>, is_error: bool) {
        self.infos.push(RunInfo {
            at: Utc::now(),
            message: message.into(),
            is_error,
        });
    }

    /// Inserts a node run, keeping the node's runs sorted by sub-number descending
    pub fn push_node_run(&mut self, node_run: WorkflowNodeRun) {
        let runs = self.node_runs.entry(node_run.node_id).or_default();
        runs.push(node_run);
        runs.sort_by(|a, b| b.sub_number.cmp(&a.sub_number).then(b.id.cmp(&a.id)));
    }

    /// Current node run of a node: highest sub-number, ties broken by highest id
    pub fn latest_node_run(&self, node_id: i64) -> Option<&WorkflowNodeRun> {
        self.node_runs.get(&node_id).and_then(|runs| latest(runs))
    }

    /// Current node run of every node, in node ID order
    pub fn latest_node_runs(&self) -> impl Iterator<Item = &WorkflowNodeRun> {
        self.node_runs.values().filter_map(|runs| latest(runs))
    }

    /// All node runs of a node, highest sub-number first
    pub fn node_run_history(&self, node_id: i64) -> Option<&[WorkflowNodeRun]> {
        self.node_runs.get(&node_id).map(Vec::as_slice)
    }

    pub fn node_run_mut(&mut self, node_run_id: i64) -> Option<&mut WorkflowNodeRun> {
        self.node_runs
            .values_mut()
            .flat_map(|runs| runs.iter_mut())
            .find(|nr| nr.id == node_run_id)
    }
}

fn latest(runs: &[WorkflowNodeRun]) -> Option<&WorkflowNodeRun> {
    runs.iter().max_by(|a, b| a.sub_number.cmp(&b.sub_number).then(a.id.cmp(&b.id)))
}

/// VCS coordinates a node run was built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsInfo {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub tag: String,
}

impl VcsInfo {
    /// Reference statuses are attached to: the tag when set, the hash otherwise
    pub fn reference(&self) -> &str {
        if self.tag.is_empty() {
            &self.hash
        } else {
            &self.tag
        }
    }
}

/// Status of one step of a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step_order: usize,
    pub name: String,
    pub status: Status,
}

/// Execution of one pipeline job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
    #[serde(default)]
    pub spawn_infos: Vec<RunInfo>,
}

/// Execution of one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub jobs: Vec<JobRun>,
}

impl Stage {
    pub fn summary(&self) -> StageSummary {
        StageSummary {
            name: self.name.clone(),
            status: self.status,
        }
    }
}

/// File produced by a node run and kept in object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5sum: String,
    /// Location of the object in the object store
    pub object_path: String,
    /// Short-lived download URL, filled on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_url: Option<String>,
}

/// One execution of one node within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNodeRun {
    /// Storage identifier, assigned on insert
    pub id: i64,
    pub workflow_run_id: i64,
    pub workflow_id: i64,
    pub node_id: i64,
    pub node_name: String,
    pub number: u64,
    pub sub_number: u64,
    pub status: Status,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub done: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual: Option<ManualTrigger>,
    #[serde(default)]
    pub hook_event: Option<HookEvent>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub pipeline_parameters: Vec<Parameter>,
    #[serde(default)]
    pub build_parameters: ParameterSet,
    /// Node runs whose completion triggered this one
    #[serde(default)]
    pub source_node_runs: Vec<i64>,
    #[serde(default)]
    pub vcs: VcsInfo,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl WorkflowNodeRun {
    pub fn stage_summaries(&self) -> Vec<StageSummary> {
        self.stages.iter().map(Stage::summary).collect()
    }

    /// Human readable summary of what failed, used for pull-request comments
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "### {} #{}.{}: {}",
            self.node_name, self.number, self.sub_number, self.status
        );

        let failed_stages: Vec<&Stage> = self
            .stages
            .iter()
            .filter(|s| s.status == Status::Fail)
            .collect();

        if failed_stages.is_empty() {
            return out;
        }

        out.push('\n');
        for stage in failed_stages {
            let _ = writeln!(out, "- stage `{}`: {}", stage.name, stage.status);
            for job in stage.jobs.iter().filter(|j| j.status == Status::Fail) {
                let _ = writeln!(out, "  - job `{}`: {}", job.name, job.status);
                for step in job.steps.iter().filter(|s| s.status == Status::Fail) {
                    let _ = writeln!(
                        out,
                        "    - step {} `{}`: {}",
                        step.step_order, step.name, step.status
                    );
                }
            }
        }

        out
    }
}
