//! Error types for the Weld orchestrator
//!
//! Every service returns [`Error`]. Layers wrap errors with an operation string
//! through [`ResultExt`]; callers classify them with [`Error::kind`], which looks
//! through any number of context layers.

use thiserror::Error;

use crate::gateway::object_store::ObjectStoreError;
use crate::gateway::vcs::VcsError;
use crate::repository::StoreError;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating runs
#[derive(Debug, Error)]
pub enum Error {
    /// Node does not exist in the workflow graph
    #[error("node {0} not found")]
    NodeNotFound(i64),

    /// Pipeline referenced by a node does not exist
    #[error("pipeline {0} not found")]
    PipelineNotFound(i64),

    /// No node owns the hook
    #[error("hook {0} not found")]
    HookNotFound(uuid::Uuid),

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("artifact {0} not found")]
    ArtifactNotFound(i64),

    /// Request is malformed or inconsistent
    #[error("wrong request: {0}")]
    WrongRequest(String),

    /// Caller may not execute on the environment
    #[error("user {user} is not allowed to execute on environment {environment}")]
    NoEnvExecution { user: String, environment: String },

    #[error(transparent)]
    Interpolation(#[from] MultiError),

    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal error: {0}")]
    Internal(String),

    /// An error recorded in a shared report
    #[error(transparent)]
    Reported(std::sync::Arc<Error>),

    /// An error wrapped with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Classification of an [`Error`], independent of context wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    WrongRequest,
    Forbidden,
    Interpolation,
    /// A VCS provider or the object store failed
    External,
    Persistence,
    Timeout,
    Internal,
}

impl Error {
    pub fn wrong_request(message: impl Into<String>) -> Self {
        Self::WrongRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Innermost error, skipping context layers
    pub fn root(&self) -> &Error {
        let mut current = self;
        loop {
            match current {
                Error::Context { source, .. } => current = source.as_ref(),
                Error::Reported(shared) => current = shared.as_ref(),
                _ => return current,
            }
        }
    }

    /// Recovers an owned error from a report handle
    pub fn from_shared(shared: std::sync::Arc<Error>) -> Self {
        std::sync::Arc::try_unwrap(shared).unwrap_or_else(Error::Reported)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::NodeNotFound(_)
            | Error::PipelineNotFound(_)
            | Error::HookNotFound(_)
            | Error::RunNotFound(_)
            | Error::ArtifactNotFound(_) => ErrorKind::NotFound,
            Error::WrongRequest(_) => ErrorKind::WrongRequest,
            Error::NoEnvExecution { .. } => ErrorKind::Forbidden,
            Error::Interpolation(_) => ErrorKind::Interpolation,
            Error::Vcs(_) | Error::ObjectStore(_) => ErrorKind::External,
            Error::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Error::Store(_) => ErrorKind::Persistence,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Internal(_) | Error::Context { .. } | Error::Reported(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Adds operation context to errors
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}

// ============================================================================
// Interpolation errors
// ============================================================================

/// Failure to interpolate a single parameter value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    #[error("parameter {key}: unterminated placeholder")]
    Unterminated { key: String },

    #[error("parameter {key}: reference cycle through {through}")]
    Cycle { key: String, through: String },

    #[error("parameter {key}: unknown filter {filter:?}")]
    UnknownFilter { key: String, filter: String },
}

impl InterpolationError {
    /// Parameter whose value failed to interpolate
    pub fn key(&self) -> &str {
        match self {
            Self::Unterminated { key } | Self::Cycle { key, .. } | Self::UnknownFilter { key, .. } => {
                key
            }
        }
    }
}

/// Aggregate of interpolation failures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError(Vec<InterpolationError>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: InterpolationError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: MultiError) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[InterpolationError] {
        &self.0
    }

    /// `Ok(())` when empty, the aggregate otherwise
    pub fn into_result(self) -> std::result::Result<(), MultiError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} interpolation error(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
