//! Artifact object storage

use async_trait::async_trait;
use thiserror::Error;
use weld_core::domain::run::Artifact;

#[derive(Debug, Clone, Error)]
pub enum ObjectStoreError {
    #[error("object {0} not found")]
    NotFound(String),

    /// Backend does not hand out temporary URLs
    #[error("temporary URLs are not supported")]
    TempUrlUnsupported,

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads the content of an artifact
    async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, ObjectStoreError>;

    /// Short-lived URL the artifact can be downloaded from
    async fn fetch_temp_url(&self, artifact: &Artifact) -> Result<String, ObjectStoreError>;
}
