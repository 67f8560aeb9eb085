//! Status vocabulary shared by runs, node runs, stages and jobs

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Execution status of a run, node run, stage or job
///
/// The vocabulary is closed: anything that reaches the orchestrator as a string
/// (for example a commit status read back from a VCS) is parsed into this enum
/// before being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    /// Work is in progress
    #[default]
    Building,

    /// Scheduled but not yet started
    Waiting,

    Success,
    Fail,
    Skipped,

    /// Interrupted by a user
    Stopped,

    Disabled,
    NeverBuilt,
}

impl Status {
    /// All statuses, in declaration order
    pub const ALL: [Status; 8] = [
        Status::Building,
        Status::Waiting,
        Status::Success,
        Status::Fail,
        Status::Skipped,
        Status::Stopped,
        Status::Disabled,
        Status::NeverBuilt,
    ];

    /// Returns true once nothing more will happen to the item
    ///
    /// Everything except `Building` and `Waiting` is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Building | Status::Waiting)
    }

    /// Returns true for the three statuses a stop request must not overwrite
    pub fn is_outcome(self) -> bool {
        matches!(self, Status::Success | Status::Fail | Status::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Building => "Building",
            Status::Waiting => "Waiting",
            Status::Success => "Success",
            Status::Fail => "Fail",
            Status::Skipped => "Skipped",
            Status::Stopped => "Stopped",
            Status::Disabled => "Disabled",
            Status::NeverBuilt => "NeverBuilt",
        }
    }

    /// Parses a state string reported by an external system
    ///
    /// Matching is case-insensitive and surrounding whitespace is ignored.
    /// Empty or unknown states yield `None`.
    pub fn parse_remote(state: &str) -> Option<Status> {
        let state = state.trim();
        Status::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(state))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not part of the status vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!Status::Building.is_terminal());
        assert!(!Status::Waiting.is_terminal());
        assert!(Status::Success.is_terminal());
        assert!(Status::Stopped.is_terminal());
        assert!(Status::NeverBuilt.is_terminal());
    }

    #[test]
    fn test_outcome_statuses() {
        assert!(Status::Success.is_outcome());
        assert!(Status::Fail.is_outcome());
        assert!(Status::Skipped.is_outcome());
        assert!(!Status::Stopped.is_outcome());
        assert!(!Status::Building.is_outcome());
    }

    #[test]
    fn test_from_str_is_exact() {
        assert_eq!("Fail".parse::<Status>(), Ok(Status::Fail));
        assert!("fail".parse::<Status>().is_err());
    }

    #[test]
    fn test_parse_remote_is_lenient() {
        assert_eq!(Status::parse_remote(" success "), Some(Status::Success));
        assert_eq!(Status::parse_remote("BUILDING"), Some(Status::Building));
        assert_eq!(Status::parse_remote(""), None);
        assert_eq!(Status::parse_remote("pending"), None);
    }
}
