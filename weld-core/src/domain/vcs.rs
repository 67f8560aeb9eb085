//! VCS exchange types
//!
//! Structures read from and written to VCS providers when reconciling commit
//! statuses. The provider-specific wire formats are owned by the VCS clients.

use serde::{Deserialize, Serialize};

use crate::domain::status::Status;

/// A commit status previously published on a VCS provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    /// Commit hash or tag the status is attached to
    #[serde(rename = "ref", default)]
    pub reference: String,
    #[serde(default)]
    pub description: String,
    /// Raw state string as reported by the provider
    #[serde(default)]
    pub state: String,
}

/// Head of a pull request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestHead {
    pub branch: String,
    pub latest_commit: String,
}

/// An open pull request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    pub head: PullRequestHead,
}

/// Short form of a node-run stage sent along with a status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    pub status: Status,
}

/// Status update pushed to a VCS provider for one node run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub project_key: String,
    pub workflow_name: String,
    pub pipeline_name: String,
    pub application_name: String,
    #[serde(default)]
    pub environment_name: Option<String>,
    pub node_name: String,
    pub node_run_id: i64,
    pub number: u64,
    pub sub_number: u64,
    pub status: Status,
    pub hash: String,
    pub tag: String,
    pub branch: String,
    pub repository_manager: String,
    pub repository_fullname: String,
    /// Description used to find this status again on the provider
    pub description: String,
    pub stages: Vec<StageSummary>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
