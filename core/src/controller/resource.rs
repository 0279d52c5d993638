use std::fmt;
use std::sync::Arc;

use super::BuildController;
use crate::build::TaskHandle;
use crate::error::CoordinatorError;
use crate::lease::WorkerLeaseService;
use crate::state::TaskResourceState;

/// A located task that other builds can queue and wait on.
#[derive(Clone)]
pub struct IncludedBuildTaskResource {
    controller: Arc<BuildController>,
    task: TaskHandle,
    leases: Arc<WorkerLeaseService>,
}

impl IncludedBuildTaskResource {
    pub(crate) fn new(
        controller: Arc<BuildController>,
        task: TaskHandle,
        leases: Arc<WorkerLeaseService>,
    ) -> Self {
        Self {
            controller,
            task,
            leases,
        }
    }

    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Adds the task to its build's queue. Only valid while the build is
    /// still discovering tasks.
    pub fn queue_for_execution(&self) -> Result<(), CoordinatorError> {
        self.controller.queue_for_execution(&self.task)
    }

    pub fn task_state(&self) -> TaskResourceState {
        self.controller.task_state(&self.task)
    }

    /// Blocks until the task has completed. The calling thread's worker
    /// lease is given back while it waits.
    pub fn await_completion(&self) -> TaskResourceState {
        self.leases.blocking_on(self.task.build(), || {
            self.controller.await_task_completion(&self.task)
        })
    }
}

impl fmt::Debug for IncludedBuildTaskResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncludedBuildTaskResource")
            .field("task", &self.task)
            .field("state", &self.task_state())
            .finish()
    }
}
