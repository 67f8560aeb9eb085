//! Gateway Module
//!
//! Interfaces to the collaborators the orchestrator drives but does not own:
//! VCS providers, the event bus, permission checks and artifact storage.

pub mod events;
pub mod object_store;
pub mod permission;
pub mod vcs;

pub use events::{EventPublisher, LogPublisher};
pub use object_store::{ObjectStore, ObjectStoreError};
pub use permission::{PermissionChecker, UserPermissions};
pub use vcs::{VcsClient, VcsError, VcsProvider};
