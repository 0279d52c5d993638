//! The build tree's task graph: the single entry point callers use to
//! request tasks, populate every build's work graph and run them.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tracing::{info, warn};

use crate::build::{TaskHandle, TaskIdentifier};
use crate::controller::{BuildControllers, ControllerSetFactory, IncludedBuildTaskResource};
use crate::engine::TaskLocator;
use crate::error::CoordinatorError;
use crate::executor::ExecutionResult;
use crate::state::{StateTransitionController, TaskGraphState, TaskResourceState};
use crate::util::lock;

/// Remembers which thread is inside a task graph operation.
struct OwnerGuard {
    owner: Mutex<Option<ThreadId>>,
}

struct Owned<'a> {
    guard: &'a OwnerGuard,
    previous: Option<ThreadId>,
}

impl OwnerGuard {
    fn enter(&self, operation: &'static str) -> Result<Owned<'_>, CoordinatorError> {
        let current = thread::current().id();
        let mut owner = lock(&self.owner);
        match *owner {
            Some(other) if other != current => Err(CoordinatorError::ConcurrentUse {
                operation,
                caller: format!("{current:?}"),
                owner: format!("{other:?}"),
            }),
            previous => {
                *owner = Some(current);
                Ok(Owned {
                    guard: self,
                    previous,
                })
            }
        }
    }
}

impl Drop for Owned<'_> {
    fn drop(&mut self) {
        *lock(&self.guard.owner) = self.previous;
    }
}

/// Puts the previous controller set back when a nested graph finishes,
/// including when the nested action panics.
struct RestoreControllers<'a> {
    graph: &'a BuildTreeWorkGraph,
    previous: Option<Arc<BuildControllers>>,
}

impl Drop for RestoreControllers<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let nested = std::mem::replace(&mut *lock(&self.graph.controllers), previous);
            let closed = nested.close();
            if !closed.is_success() {
                for failure in closed.failures() {
                    warn!(error = %failure, "failed to stop nested build controller");
                }
            }
        }
        let _ = self.graph.state.restart(
            &[
                TaskGraphState::QueuingTasks,
                TaskGraphState::ReadyToRun,
                TaskGraphState::Running,
                TaskGraphState::Finished,
            ],
            TaskGraphState::QueuingTasks,
        );
    }
}

/// Task graph shared by every build of the tree.
///
/// Moves through `QueuingTasks -> ReadyToRun -> Running -> Finished`.
/// Tasks may be requested again once the graph is ready to run, which moves
/// it back to `QueuingTasks`. One thread drives the graph at a time; a call
/// from another thread while an operation is in progress fails with
/// [`CoordinatorError::ConcurrentUse`].
pub struct BuildTreeWorkGraph {
    factory: ControllerSetFactory,
    controllers: Mutex<Arc<BuildControllers>>,
    state: StateTransitionController<TaskGraphState>,
    owner: OwnerGuard,
}

impl BuildTreeWorkGraph {
    pub fn new(factory: ControllerSetFactory) -> Self {
        let controllers = factory.create();
        Self {
            factory,
            controllers: Mutex::new(controllers),
            state: StateTransitionController::new("build tree task graph", TaskGraphState::QueuingTasks),
            owner: OwnerGuard {
                owner: Mutex::new(None),
            },
        }
    }

    pub fn state(&self) -> TaskGraphState {
        self.state.state()
    }

    fn controllers(&self) -> Arc<BuildControllers> {
        Arc::clone(&lock(&self.controllers))
    }

    /// Finds a task, configuring its build if needed. The caller queues the
    /// returned resource to have it run.
    pub fn locate_task(
        &self,
        task: &TaskIdentifier,
    ) -> Result<IncludedBuildTaskResource, CoordinatorError> {
        let _owner = self.owner.enter("locate_task")?;
        self.state.transition_any(
            &[TaskGraphState::QueuingTasks, TaskGraphState::ReadyToRun],
            TaskGraphState::QueuingTasks,
            || self.controllers().locate_task(task),
        )
    }

    /// Schedules every queued task until no build discovers more work, then
    /// finalizes all work graphs.
    pub fn populate_task_graphs(&self) -> Result<(), CoordinatorError> {
        let _owner = self.owner.enter("populate_task_graphs")?;
        self.state.transition_any(
            &[TaskGraphState::QueuingTasks, TaskGraphState::ReadyToRun],
            TaskGraphState::ReadyToRun,
            || self.controllers().populate_work_graphs(),
        )
    }

    /// Starts every build's work and returns without waiting.
    pub fn start_task_execution(&self) -> Result<(), CoordinatorError> {
        let _owner = self.owner.enter("start_task_execution")?;
        self.state.transition(
            TaskGraphState::ReadyToRun,
            TaskGraphState::Running,
            || {
                self.controllers().start_execution();
                Ok(())
            },
        )
    }

    /// Waits for the started work, passing every failure to `sink` in build
    /// order. The graph is `Finished` afterwards, whatever happened.
    pub fn await_task_completion(
        &self,
        mut sink: impl FnMut(anyhow::Error),
    ) -> Result<(), CoordinatorError> {
        let _owner = self.owner.enter("await_task_completion")?;
        let result = self.state.transition_ignoring_failures(
            &[TaskGraphState::Running],
            TaskGraphState::Finished,
            || self.controllers().await_completion(),
        )?;
        let failures = result.into_failures();
        info!(failures = failures.len(), "task graph finished");
        failures.into_iter().for_each(&mut sink);
        Ok(())
    }

    /// Populates, starts and awaits in one call.
    pub fn run_scheduled_tasks(
        &self,
        sink: impl FnMut(anyhow::Error),
    ) -> Result<(), CoordinatorError> {
        let _owner = self.owner.enter("run_scheduled_tasks")?;
        self.populate_task_graphs()?;
        self.start_task_execution()?;
        self.await_task_completion(sink)
    }

    /// Runs `action` against a fresh, empty task graph, for work that has to
    /// finish before the current graph can continue. The current graph is
    /// restored afterwards and is back in `QueuingTasks`.
    pub fn with_nested_task_graph<R>(
        &self,
        action: impl FnOnce(&BuildTreeWorkGraph) -> R,
    ) -> Result<R, CoordinatorError> {
        let _owner = self.owner.enter("with_nested_task_graph")?;
        self.state.assert_in_state(TaskGraphState::QueuingTasks)?;

        let nested = self.factory.create();
        let previous = std::mem::replace(&mut *lock(&self.controllers), nested);
        let _restore = RestoreControllers {
            graph: self,
            previous: Some(previous),
        };
        Ok(action(self))
    }

    /// Outcome of every task scheduled in the current graph, in build order.
    pub fn task_states(&self) -> Vec<(TaskHandle, TaskResourceState)> {
        self.controllers().task_states()
    }

    /// Discards every build's work graph.
    pub fn close(&self) -> ExecutionResult<()> {
        self.controllers().close()
    }
}
