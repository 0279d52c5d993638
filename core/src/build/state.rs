use std::fmt;
use std::thread::{self, ThreadId};
use std::sync::Mutex;

use tracing::debug;

use super::{BuildDefinition, BuildIdentity, BuildKind, TaskHandle};
use crate::engine::{BuildEngine, BuildWorkGraph, TaskLocator};
use crate::error::CoordinatorError;
use crate::util::lock;

/// Lifecycle of a build within one session. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildLifecycle {
    Created,
    Configuring,
    Configured,
    HasWorkGraph,
    Stopped,
}

struct Lifecycle {
    phase: BuildLifecycle,
    configuring_thread: Option<ThreadId>,
    failure: Option<String>,
}

/// A build registered in the tree: the shared session state plus the
/// engine that does the kind-specific work.
pub struct BuildState {
    identity: BuildIdentity,
    kind: BuildKind,
    definition: BuildDefinition,
    lifecycle: Mutex<Lifecycle>,
    engine: Box<dyn BuildEngine>,
}

impl BuildState {
    pub fn new(
        identity: BuildIdentity,
        kind: BuildKind,
        definition: BuildDefinition,
        engine: Box<dyn BuildEngine>,
    ) -> Self {
        Self {
            identity,
            kind,
            definition,
            lifecycle: Mutex::new(Lifecycle {
                phase: BuildLifecycle::Created,
                configuring_thread: None,
                failure: None,
            }),
            engine,
        }
    }

    pub fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    pub fn kind(&self) -> BuildKind {
        self.kind
    }

    pub fn definition(&self) -> &BuildDefinition {
        &self.definition
    }

    pub fn lifecycle(&self) -> BuildLifecycle {
        lock(&self.lifecycle).phase
    }

    /// Configures the build on first use.
    ///
    /// Configuration may request tasks from other builds (or this one)
    /// through `locator`; a nested call from the configuring thread sees the
    /// build as already configured.
    pub fn ensure_configured(&self, locator: &dyn TaskLocator) -> Result<(), CoordinatorError> {
        let current = thread::current().id();
        {
            let mut lifecycle = lock(&self.lifecycle);
            if let Some(cause) = lifecycle.failure.clone() {
                return Err(CoordinatorError::Poisoned {
                    name: self.identity.to_string(),
                    cause,
                });
            }
            match lifecycle.phase {
                BuildLifecycle::Created => {
                    lifecycle.phase = BuildLifecycle::Configuring;
                    lifecycle.configuring_thread = Some(current);
                }
                BuildLifecycle::Configuring if lifecycle.configuring_thread == Some(current) => {
                    return Ok(());
                }
                BuildLifecycle::Configuring => {
                    return Err(CoordinatorError::illegal_state(format!(
                        "{} is being configured by another thread",
                        self.identity
                    )));
                }
                BuildLifecycle::Stopped => {
                    return Err(CoordinatorError::illegal_state(format!(
                        "{} has been stopped",
                        self.identity
                    )));
                }
                BuildLifecycle::Configured | BuildLifecycle::HasWorkGraph => return Ok(()),
            }
        }

        debug!(build = %self.identity, "configuring build");
        let result = self.engine.configure(locator);

        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.configuring_thread = None;
        match result {
            Ok(()) => {
                lifecycle.phase = BuildLifecycle::Configured;
                Ok(())
            }
            Err(err) => {
                lifecycle.phase = BuildLifecycle::Created;
                lifecycle.failure = Some(format!("{err:#}"));
                Err(CoordinatorError::Build(
                    err.context(format!("failed to configure {}", self.identity)),
                ))
            }
        }
    }

    /// Resolves a task path to a handle, configuring the build if needed.
    pub fn resolve_task(
        &self,
        path: &str,
        locator: &dyn TaskLocator,
    ) -> Result<TaskHandle, CoordinatorError> {
        self.ensure_configured(locator)?;
        let handle = TaskHandle::new(self.identity.clone(), path);
        if self.engine.contains_task(handle.path()) {
            Ok(handle)
        } else {
            Err(CoordinatorError::TaskNotFound {
                build: self.identity.clone(),
                path: handle.path().to_string(),
            })
        }
    }

    /// Creates the work graph for this invocation. The build must have been
    /// configured.
    pub fn new_work_graph(&self) -> Result<Box<dyn BuildWorkGraph>, CoordinatorError> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            match lifecycle.phase {
                BuildLifecycle::Configured | BuildLifecycle::HasWorkGraph => {
                    lifecycle.phase = BuildLifecycle::HasWorkGraph;
                }
                other => {
                    return Err(CoordinatorError::illegal_state(format!(
                        "cannot create a work graph for {} in phase {other:?}",
                        self.identity
                    )));
                }
            }
        }
        Ok(self.engine.new_work_graph())
    }

    /// Stops the build. Repeated calls are no-ops.
    pub fn stop(&self) -> anyhow::Result<()> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.phase == BuildLifecycle::Stopped {
                return Ok(());
            }
            lifecycle.phase = BuildLifecycle::Stopped;
        }
        debug!(build = %self.identity, "stopping build");
        self.engine.stop()
    }
}

impl fmt::Debug for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildState")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}
