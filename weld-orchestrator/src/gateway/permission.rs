//! Permission checks

use async_trait::async_trait;
use weld_core::domain::user::{PermissionLevel, User};

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Returns true when `actor` holds at least `level` on the environment
    async fn access_to_environment(
        &self,
        project_key: &str,
        environment: &str,
        actor: &User,
        level: PermissionLevel,
    ) -> bool;
}

/// Checks the environment permissions carried by the user itself
///
/// Administrators pass every check.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserPermissions;

#[async_trait]
impl PermissionChecker for UserPermissions {
    async fn access_to_environment(
        &self,
        project_key: &str,
        environment: &str,
        actor: &User,
        level: PermissionLevel,
    ) -> bool {
        actor.admin
            || actor
                .environment_permission(project_key, environment)
                .is_some_and(|granted| granted >= level)
    }
}
