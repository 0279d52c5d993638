//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `buildtree_core::api` instead of reaching into internal modules.

pub use crate::build::{
    BuildDefinition, BuildIdentity, BuildKind, BuildLifecycle, BuildState, RootBuildDefinition,
    TaskHandle, TaskIdentifier,
};
pub use crate::config::{load_default, CompositeConfig, ExecutionConfig, LoggingConfig};
pub use crate::controller::IncludedBuildTaskResource;
pub use crate::engine::{
    BuildEngine, BuildEngineFactory, BuildWorkGraph, TaskExecutionListener, TaskLocator,
};
pub use crate::error::{ConfigError, CoordinatorError};
pub use crate::executor::{ExecutionResult, MultipleFailures};
pub use crate::facade::BuildTreeWorkGraph;
pub use crate::lease::{Stall, WorkerLease, WorkerLeaseService};
pub use crate::registry::BuildRegistry;
pub use crate::scripted::{ExecutionLog, ScriptedBuild, ScriptedEngineFactory, ScriptedTask, TaskRef};
pub use crate::services::BuildTreeServices;
pub use crate::state::{TaskGraphState, TaskResourceState};
