//! Orchestrator configuration
//!
//! Tunables of the run-start fan-out and of commit-status publication.

use std::time::Duration;

const DEFAULT_RUN_START_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_PARALLEL_BRANCHES: usize = 8;
const DEFAULT_COMMIT_STATUS_PREFIX: &str = "weld";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum time a run start may take, branches included
    pub run_start_timeout: Duration,

    /// Max from-node branches running at the same time
    pub max_parallel_branches: usize,

    /// First segment of commit-status descriptions
    /// (`<prefix>/<project>/<workflow>/<node>`)
    pub commit_status_prefix: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            run_start_timeout: DEFAULT_RUN_START_TIMEOUT,
            max_parallel_branches: DEFAULT_MAX_PARALLEL_BRANCHES,
            commit_status_prefix: DEFAULT_COMMIT_STATUS_PREFIX.to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WELD_RUN_START_TIMEOUT (optional, seconds, default: 60)
    /// - WELD_MAX_PARALLEL_BRANCHES (optional, default: 8)
    /// - WELD_COMMIT_STATUS_PREFIX (optional, default: weld)
    pub fn from_env() -> anyhow::Result<Self> {
        let run_start_timeout = match std::env::var("WELD_RUN_START_TIMEOUT") {
            Ok(s) => Duration::from_secs(s.parse::<u64>().map_err(|e| {
                anyhow::anyhow!("WELD_RUN_START_TIMEOUT must be a number of seconds: {}", e)
            })?),
            Err(_) => DEFAULT_RUN_START_TIMEOUT,
        };

        let max_parallel_branches = match std::env::var("WELD_MAX_PARALLEL_BRANCHES") {
            Ok(s) => s.parse::<usize>().map_err(|e| {
                anyhow::anyhow!("WELD_MAX_PARALLEL_BRANCHES must be a number: {}", e)
            })?,
            Err(_) => DEFAULT_MAX_PARALLEL_BRANCHES,
        };

        let commit_status_prefix = std::env::var("WELD_COMMIT_STATUS_PREFIX")
            .unwrap_or_else(|_| DEFAULT_COMMIT_STATUS_PREFIX.to_string());

        let config = Self {
            run_start_timeout,
            max_parallel_branches,
            commit_status_prefix,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_run_start_timeout(mut self, timeout: Duration) -> Self {
        self.run_start_timeout = timeout;
        self
    }

    pub fn with_max_parallel_branches(mut self, max: usize) -> Self {
        self.max_parallel_branches = max;
        self
    }

    pub fn with_commit_status_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_status_prefix = prefix.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run_start_timeout.is_zero() {
            anyhow::bail!("run_start_timeout must be greater than 0");
        }

        if self.max_parallel_branches == 0 {
            anyhow::bail!("max_parallel_branches must be greater than 0");
        }

        if self.commit_status_prefix.trim().is_empty() {
            anyhow::bail!("commit_status_prefix cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
