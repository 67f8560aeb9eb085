//! User domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Permission level on a resource, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PermissionLevel {
    Read,
    ReadExecute,
    ReadWriteExecute,
}

/// The actor behind a manual run or a stop request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Environment permissions keyed by `"<project key>/<environment name>"`
    #[serde(default)]
    pub environment_permissions: HashMap<String, PermissionLevel>,
    #[serde(default)]
    pub admin: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_environment_permission(
        mut self,
        project_key: &str,
        environment: &str,
        level: PermissionLevel,
    ) -> Self {
        self.environment_permissions
            .insert(environment_key(project_key, environment), level);
        self
    }

    /// Returns the permission granted on an environment, if any
    pub fn environment_permission(
        &self,
        project_key: &str,
        environment: &str,
    ) -> Option<PermissionLevel> {
        self.environment_permissions
            .get(&environment_key(project_key, environment))
            .copied()
    }

    /// Copy of the user suitable for storing on a node run
    ///
    /// Groups are dropped and only environment permissions are kept.
    pub fn for_trigger(&self) -> Self {
        Self {
            username: self.username.clone(),
            fullname: self.fullname.clone(),
            groups: Vec::new(),
            environment_permissions: self.environment_permissions.clone(),
            admin: self.admin,
        }
    }
}

fn environment_key(project_key: &str, environment: &str) -> String {
    format!("{}/{}", project_key, environment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_levels_are_ordered() {
        assert!(PermissionLevel::Read < PermissionLevel::ReadExecute);
        assert!(PermissionLevel::ReadExecute < PermissionLevel::ReadWriteExecute);
    }

    #[test]
    fn test_for_trigger_drops_groups() {
        let mut user = User::new("alice").with_environment_permission(
            "PROJ",
            "prod",
            PermissionLevel::ReadExecute,
        );
        user.groups.push("devs".to_string());

        let copy = user.for_trigger();
        assert!(copy.groups.is_empty());
        assert_eq!(
            copy.environment_permission("PROJ", "prod"),
            Some(PermissionLevel::ReadExecute)
        );
    }
}
