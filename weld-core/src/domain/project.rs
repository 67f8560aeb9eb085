//! Project domain types
//!
//! A project owns variables, applications, environments, deployment platforms
//! and the VCS servers its applications are bound to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named variable declared on a project, application or environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub vcs_servers: Vec<VcsServer>,
}

impl Project {
    /// Finds the VCS server registered on the project under `name`
    pub fn vcs_server(&self, name: &str) -> Option<&VcsServer> {
        self.vcs_servers.iter().find(|s| s.name == name)
    }
}

/// A VCS server linked to a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsServer {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// How workers clone an application repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStrategy {
    /// `ssh` or `https`; empty when the application has no repository
    #[serde(default)]
    pub connection_type: String,
    #[serde(default)]
    pub ssh_key: String,
    #[serde(default)]
    pub pgp_key: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub default_branch: String,
}

/// Key/value configuration of a deployment platform
pub type PlatformConfig = BTreeMap<String, String>;

/// An application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub repository_strategy: RepositoryStrategy,
    /// Name of the VCS server (see [`Project::vcs_servers`])
    #[serde(default)]
    pub vcs_server: String,
    /// Repository full name on the VCS server, e.g. `org/repo`
    #[serde(default)]
    pub repository_fullname: String,
    /// Per-platform deployment configuration, keyed by platform name
    #[serde(default)]
    pub deployment_strategies: BTreeMap<String, PlatformConfig>,
}

impl Application {
    pub fn is_linked_to_repo(&self) -> bool {
        !self.vcs_server.is_empty() && !self.repository_fullname.is_empty()
    }
}

/// An environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// A deployment platform configured on the project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPlatform {
    pub name: String,
    #[serde(default)]
    pub config: PlatformConfig,
}
