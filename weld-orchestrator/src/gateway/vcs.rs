//! VCS gateway
//!
//! Narrow view of a version-control provider: commit statuses and pull
//! requests. Provider implementations (GitHub, GitLab, Bitbucket, ...) live
//! outside this crate.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use weld_core::domain::project::VcsServer;
use weld_core::domain::vcs::{CommitStatus, PullRequest, StatusEvent};

/// Errors reported by VCS providers
#[derive(Debug, Clone, Error)]
pub enum VcsError {
    /// Provider could not authenticate the orchestrator
    #[error("unauthorized on {0}")]
    Unauthorized(String),

    /// HTTP request failed
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider answered with an error status
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
}

impl VcsError {
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }
}

/// Client bound to one VCS server
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Commit statuses previously published on `reference` (hash or tag)
    async fn list_statuses(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Vec<CommitStatus>, VcsError>;

    /// Publishes a commit status
    async fn set_status(&self, event: &StatusEvent) -> Result<(), VcsError>;

    /// Open pull requests of a repository
    async fn pull_requests(&self, repository: &str) -> Result<Vec<PullRequest>, VcsError>;

    async fn pull_request_comment(
        &self,
        repository: &str,
        pull_request_id: i64,
        text: &str,
    ) -> Result<(), VcsError>;
}

/// Hands out authorized clients for the VCS servers of a project
#[async_trait]
pub trait VcsProvider: Send + Sync {
    async fn client(&self, server: &VcsServer) -> Result<Arc<dyn VcsClient>, VcsError>;
}
