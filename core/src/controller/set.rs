use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{BuildController, CompletionCallback, IncludedBuildTaskResource};
use crate::build::{BuildIdentity, TaskHandle, TaskIdentifier};
use crate::engine::TaskLocator;
use crate::error::CoordinatorError;
use crate::executor::{BuildExecutor, CountDownLatch, ExecutionResult};
use crate::lease::{Stall, WorkerLeaseService};
use crate::registry::BuildRegistry;
use crate::state::{ControllerState, TaskResourceState};
use crate::util::lock;

type Results = Arc<Mutex<BTreeMap<BuildIdentity, ExecutionResult<()>>>>;

struct PendingExecution {
    latch: Arc<CountDownLatch>,
    results: Results,
}

/// Everything needed to create a fresh [`BuildControllers`].
#[derive(Clone)]
pub struct ControllerSetFactory {
    registry: Arc<dyn BuildRegistry>,
    executor: Arc<BuildExecutor>,
    leases: Arc<WorkerLeaseService>,
    poll_interval: Duration,
}

impl ControllerSetFactory {
    pub fn new(
        registry: Arc<dyn BuildRegistry>,
        executor: Arc<BuildExecutor>,
        leases: Arc<WorkerLeaseService>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            leases,
            poll_interval,
        }
    }

    pub fn create(&self) -> Arc<BuildControllers> {
        Arc::new(BuildControllers {
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            leases: Arc::clone(&self.leases),
            poll_interval: self.poll_interval,
            controllers: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(None),
        })
    }
}

/// The controllers of one task graph, one per build that takes part in it.
///
/// Controllers are kept in build order (included builds by path, the root
/// build last) and every pass over them uses that order.
pub struct BuildControllers {
    registry: Arc<dyn BuildRegistry>,
    executor: Arc<BuildExecutor>,
    leases: Arc<WorkerLeaseService>,
    poll_interval: Duration,
    controllers: Mutex<BTreeMap<BuildIdentity, Arc<BuildController>>>,
    pending: Mutex<Option<PendingExecution>>,
}

impl BuildControllers {
    /// Returns the controller for `build`, creating it on first use.
    pub fn get_build_controller(
        &self,
        build: &BuildIdentity,
    ) -> Result<Arc<BuildController>, CoordinatorError> {
        if let Some(controller) = lock(&self.controllers).get(build) {
            return Ok(Arc::clone(controller));
        }
        let state = self
            .registry
            .get_build(build)
            .ok_or_else(|| CoordinatorError::UnknownBuild(build.clone()))?;
        let controller = Arc::new(BuildController::new(state));
        let mut controllers = lock(&self.controllers);
        let controller = controllers.entry(build.clone()).or_insert_with(|| {
            debug!(build = %build, "created build controller");
            controller
        });
        Ok(Arc::clone(controller))
    }

    pub fn controllers(&self) -> Vec<Arc<BuildController>> {
        lock(&self.controllers).values().cloned().collect()
    }

    /// Schedules queued tasks until no build discovers more work, then
    /// finalizes every work graph.
    ///
    /// Each pass works on the controllers that existed when it started;
    /// controllers created during a pass are picked up by the next one.
    pub fn populate_work_graphs(&self) -> Result<(), CoordinatorError> {
        let mut passes = 0;
        loop {
            passes += 1;
            let mut scheduled = false;
            for controller in self.controllers() {
                if controller.state() != ControllerState::DiscoveringTasks {
                    continue;
                }
                scheduled |= controller.schedule_queued_tasks(self)?;
            }
            if !scheduled {
                break;
            }
        }

        let controllers = self.controllers();
        for controller in &controllers {
            if controller.state() == ControllerState::DiscoveringTasks {
                controller.finalize_work_graph()?;
            }
        }
        info!(builds = controllers.len(), passes, "populated work graphs");
        Ok(())
    }

    /// Submits every build's work without waiting for it.
    pub fn start_execution(&self) {
        let controllers = self.controllers();
        let latch = Arc::new(CountDownLatch::new(controllers.len()));
        let results: Results = Arc::new(Mutex::new(BTreeMap::new()));

        for controller in controllers {
            let build = controller.identity().clone();
            let on_complete: CompletionCallback = {
                let build = build.clone();
                let latch = Arc::clone(&latch);
                let results = Arc::clone(&results);
                Box::new(move |result| {
                    lock(&results).insert(build, result);
                    latch.count_down();
                })
            };
            if let Err(err) = controller.start_execution(&self.executor, &self.leases, on_complete) {
                lock(&results).insert(build, ExecutionResult::failed(err.into_failure()));
                latch.count_down();
            }
        }

        *lock(&self.pending) = Some(PendingExecution { latch, results });
    }

    /// Waits for the work started by [`start_execution`](Self::start_execution).
    ///
    /// The calling thread gives up its worker lease while it waits and
    /// checks the health of the worker pool every poll interval. When no
    /// build can make progress, waits on tasks of other builds are failed so
    /// the blocked builds can finish, and the run fails as unhealthy.
    /// Failures are reported in build order.
    pub fn await_completion(&self) -> ExecutionResult<()> {
        let Some(pending) = lock(&self.pending).take() else {
            return ExecutionResult::failed(
                CoordinatorError::illegal_state("build execution has not been started")
                    .into_failure(),
            );
        };

        let unhealthy = self.leases.blocking(|| self.wait_until_done(&pending.latch));
        if let Some(diagnostics) = &unhealthy {
            error!("{diagnostics}");
            self.leases.log_state();
            for controller in self.controllers() {
                controller.abort_waits();
            }
            if self.leases.blocking(|| self.wait_until_done(&pending.latch)).is_some() {
                warn!(
                    remaining = pending.latch.count(),
                    "builds are still blocked after failing their waits, not waiting for them"
                );
            }
        }

        let finished = std::mem::take(&mut *lock(&pending.results));
        let mut result = ExecutionResult::ok();
        for (_, build_result) in finished {
            result = result.with_failures(build_result);
        }
        if let Some(diagnostics) = unhealthy {
            result = result.with_failures(ExecutionResult::<()>::failed(
                CoordinatorError::Unhealthy { diagnostics }.into_failure(),
            ));
        }
        result
    }

    /// Waits for `latch` to open. Returns diagnostics instead when the pool
    /// reports the same stall on two polls in a row.
    fn wait_until_done(&self, latch: &CountDownLatch) -> Option<String> {
        let mut suspected: Option<Stall> = None;
        loop {
            if latch.await_timeout(self.poll_interval) {
                return None;
            }
            match (self.leases.health_check(), suspected.take()) {
                (Some(stall), Some(previous)) if stall.generation() == previous.generation() => {
                    return Some(stall.into_diagnostics());
                }
                (stall, _) => {
                    if let Some(stall) = &stall {
                        debug!(generation = stall.generation(), "worker pool looks stalled");
                    }
                    suspected = stall;
                }
            }
        }
    }

    pub fn execute(&self) -> ExecutionResult<()> {
        self.start_execution();
        self.await_completion()
    }

    /// Per-task outcome of every scheduled task, in build order.
    pub fn task_states(&self) -> Vec<(TaskHandle, TaskResourceState)> {
        self.controllers()
            .iter()
            .flat_map(|controller| {
                controller
                    .scheduled_tasks()
                    .into_iter()
                    .map(|task| {
                        let state = controller.task_state(&task);
                        (task, state)
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Stops every controller, collecting all failures.
    pub fn close(&self) -> ExecutionResult<()> {
        let failures = self
            .controllers()
            .iter()
            .filter_map(|controller| controller.stop().err())
            .map(CoordinatorError::into_failure)
            .collect();
        ExecutionResult::maybe_failed(failures)
    }
}

impl TaskLocator for BuildControllers {
    fn locate_task(
        &self,
        task: &TaskIdentifier,
    ) -> Result<IncludedBuildTaskResource, CoordinatorError> {
        let controller = self.get_build_controller(task.build())?;
        let handle = match task {
            TaskIdentifier::Handle(handle) => controller.build().resolve_task(handle.path(), self)?,
            TaskIdentifier::Path { path, .. } => controller.build().resolve_task(path, self)?,
        };
        Ok(IncludedBuildTaskResource::new(
            controller,
            handle,
            Arc::clone(&self.leases),
        ))
    }
}

impl fmt::Debug for BuildControllers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.controllers()).finish()
    }
}
