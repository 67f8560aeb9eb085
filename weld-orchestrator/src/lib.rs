//! Weld Orchestrator
//!
//! Run orchestration engine of the Weld CI/CD platform.
//!
//! This crate contains:
//! - Service layer: build-parameter resolution, run start, stop, commit-status
//!   reconciliation, event emission and artifact access
//! - Repository layer: transactional persistence traits and an in-memory store
//! - Gateway layer: VCS, event bus, permission and object-store interfaces
//!
//! HTTP handlers call the service functions with an [`Orchestrator`], which
//! bundles the collaborators every operation needs.

pub mod config;
pub mod error;
pub mod gateway;
pub mod report;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use report::ProcessorReport;

use gateway::{EventPublisher, LogPublisher, ObjectStore, PermissionChecker, UserPermissions, VcsProvider};
use repository::Store;

/// Collaborators and configuration shared by every orchestration operation
///
/// Cloning is cheap: collaborators are reference counted.
#[derive(Clone)]
pub struct Orchestrator {
    pub store: Arc<dyn Store>,
    pub vcs: Arc<dyn VcsProvider>,
    pub objects: Arc<dyn ObjectStore>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub events: Arc<dyn EventPublisher>,
    pub config: Config,
}

impl Orchestrator {
    /// Creates an orchestrator checking permissions on the user and logging events
    pub fn new(
        store: Arc<dyn Store>,
        vcs: Arc<dyn VcsProvider>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            store,
            vcs,
            objects,
            permissions: Arc::new(UserPermissions),
            events: Arc::new(LogPublisher),
            config: Config::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the configuration, rejecting an invalid one
    pub fn with_config(mut self, config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    #[test]
    fn test_with_config_rejects_invalid_config() {
        let (orch, _, _) = test_support::orchestrator(&MemoryStore::new());

        let err = orch
            .clone()
            .with_config(Config::new().with_max_parallel_branches(0))
            .err()
            .unwrap();
        assert!(err.to_string().contains("max_parallel_branches"));

        let orch = orch
            .with_config(Config::new().with_max_parallel_branches(3))
            .unwrap();
        assert_eq!(orch.config.max_parallel_branches, 3);
    }
}
