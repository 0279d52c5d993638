//! Seams to the per-build work engine.
//!
//! The coordinator never looks inside a build: it asks a [`BuildEngine`] to
//! configure itself and hands out a [`BuildWorkGraph`] per invocation. Engines
//! request tasks from other builds through a [`TaskLocator`] and report task
//! completion through a [`TaskExecutionListener`].

use crate::build::{BuildDefinition, BuildIdentity, BuildKind, TaskHandle, TaskIdentifier};
use crate::controller::IncludedBuildTaskResource;
use crate::error::CoordinatorError;
use crate::executor::ExecutionResult;
use crate::state::TaskResourceState;

/// Per-build behaviour for a registered build.
pub trait BuildEngine: Send + Sync {
    /// Runs build configuration. Called at most once per build, on the
    /// first task resolution.
    fn configure(&self, locator: &dyn TaskLocator) -> anyhow::Result<()>;

    /// Whether `path` (e.g. `:check`) names a task of this build.
    fn contains_task(&self, path: &str) -> bool;

    fn new_work_graph(&self) -> Box<dyn BuildWorkGraph>;

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The tasks one build will run in this invocation.
pub trait BuildWorkGraph: Send {
    /// Adds `tasks` and whatever they depend on. Dependencies living in
    /// other builds are requested through `locator`.
    fn schedule(&mut self, tasks: &[TaskHandle], locator: &dyn TaskLocator)
        -> anyhow::Result<()>;

    /// Direct dependencies of a scheduled task, including ones in other
    /// builds.
    fn dependencies(&self, task: &TaskHandle) -> Vec<TaskHandle>;

    /// Called once, after every scheduling pass of the tree has finished.
    fn finalize_graph(&mut self) -> anyhow::Result<()>;

    /// Runs the finalized graph, reporting each task through `listener`.
    fn run_work(&mut self, listener: &dyn TaskExecutionListener) -> ExecutionResult<()>;

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates engines for newly registered builds.
pub trait BuildEngineFactory: Send + Sync {
    fn create_engine(
        &self,
        identity: &BuildIdentity,
        kind: BuildKind,
        definition: &BuildDefinition,
    ) -> anyhow::Result<Box<dyn BuildEngine>>;
}

/// Finds a task in any build of the tree.
pub trait TaskLocator {
    fn locate_task(
        &self,
        task: &TaskIdentifier,
    ) -> Result<IncludedBuildTaskResource, CoordinatorError>;
}

pub trait TaskExecutionListener: Sync {
    fn task_finished(&self, task: &TaskHandle, state: TaskResourceState);
}
