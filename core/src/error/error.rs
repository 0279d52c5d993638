use thiserror::Error;

use crate::build::BuildIdentity;

/// Errors raised by the build tree coordinator itself.
///
/// Failures produced by build engines travel as `anyhow::Error` inside
/// [`crate::executor::ExecutionResult`]; when a coordinator operation has to
/// surface one directly it is wrapped in [`CoordinatorError::Build`].
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("{operation} called from thread {caller} while the task graph is owned by thread {owner}")]
    ConcurrentUse {
        operation: &'static str,
        caller: String,
        owner: String,
    },

    #[error("{0}")]
    Configuration(String),

    #[error("a cycle has been detected in the definition of plugin builds: {path}")]
    BuildCycle { path: String },

    #[error("Circular dependency between the following tasks:\n{diagram}")]
    CircularDependency { diagram: String },

    #[error("task '{path}' not found in {build}")]
    TaskNotFound { build: BuildIdentity, path: String },

    #[error("{0} is not registered")]
    UnknownBuild(BuildIdentity),

    #[error("included builds are unhealthy:\n{diagnostics}")]
    Unhealthy { diagnostics: String },

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("{name} previously failed: {cause}")]
    Poisoned { name: String, cause: String },

    #[error(transparent)]
    Build(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// State machine and threading violations: callers misused the API
    /// rather than a build failing.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_) | Self::ConcurrentUse { .. } | Self::Poisoned { .. }
        )
    }

    /// Converts into a failure suitable for an `ExecutionResult`, unwrapping
    /// engine failures instead of nesting them.
    pub fn into_failure(self) -> anyhow::Error {
        match self {
            Self::Build(err) => err,
            other => anyhow::Error::new(other),
        }
    }
}
