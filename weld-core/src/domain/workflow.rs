//! Workflow domain types
//!
//! A workflow is a DAG of nodes rooted at [`Workflow::root_id`]. Each node runs
//! one pipeline within a context (application, environment, platform, defaults)
//! and triggers its `children` once it completes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use uuid::Uuid;

use crate::domain::parameter::Parameter;
use crate::domain::project::{Application, Environment, ProjectPlatform};

/// Pipeline definition referenced by workflow nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    /// Declared parameters with their default values
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub stages: Vec<PipelineStage>,
}

/// Stage of a pipeline definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<PipelineJob>,
}

/// Job of a pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineJob {
    pub name: String,
    /// Step names, in execution order
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Execution context of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeContext {
    #[serde(default)]
    pub application: Option<Application>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub project_platform: Option<ProjectPlatform>,
    #[serde(default)]
    pub default_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub default_pipeline_parameters: Vec<Parameter>,
}

/// A hook attached to a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHook {
    pub uuid: Uuid,
    /// Hook model, e.g. `RepositoryWebHook` or `Scheduler`
    pub model: String,
}

/// A vertex of the workflow graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub pipeline_id: i64,
    #[serde(default)]
    pub context: NodeContext,
    /// Nodes triggered by this one
    #[serde(default)]
    pub children: Vec<i64>,
    #[serde(default)]
    pub hooks: Vec<NodeHook>,
}

impl Node {
    pub fn application(&self) -> Option<&Application> {
        self.context.application.as_ref()
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.context.environment.as_ref()
    }

    pub fn project_platform(&self) -> Option<&ProjectPlatform> {
        self.context.project_platform.as_ref()
    }

    /// Returns true when the node application is bound to a VCS repository
    pub fn is_linked_to_repo(&self) -> bool {
        self.application().is_some_and(Application::is_linked_to_repo)
    }
}

/// A workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    pub project_key: String,
    pub root_id: i64,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pipelines: BTreeMap<i64, Pipeline>,
}

impl Workflow {
    pub fn node(&self, id: i64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn root(&self) -> Option<&Node> {
        self.node(self.root_id)
    }

    pub fn pipeline(&self, id: i64) -> Option<&Pipeline> {
        self.pipelines.get(&id)
    }

    /// Direct parents of a node, in node declaration order
    pub fn parents(&self, id: i64) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.children.contains(&id))
            .collect()
    }

    /// Ancestor node IDs, nearest first, without duplicates
    pub fn ancestors(&self, id: i64) -> Vec<i64> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<i64> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for parent in self.parents(current) {
                if seen.insert(parent.id) {
                    ordered.push(parent.id);
                    queue.push_back(parent.id);
                }
            }
        }

        ordered
    }

    /// Distinct repositories referenced by the nodes of this workflow
    pub fn repositories(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter_map(Node::application)
            .map(|app| app.repository_fullname.as_str())
            .filter(|repo| !repo.is_empty())
            .collect()
    }

    /// Finds the node owning the hook `uuid`
    pub fn hook(&self, uuid: Uuid) -> Option<(&Node, &NodeHook)> {
        self.nodes
            .iter()
            .find_map(|n| n.hooks.iter().find(|h| h.uuid == uuid).map(|h| (n, h)))
    }
}
