use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::build::{BuildIdentity, BuildState, TaskHandle};
use crate::engine::{BuildWorkGraph, TaskExecutionListener, TaskLocator};
use crate::error::CoordinatorError;
use crate::executor::{check_for_cycles, BuildExecutor, ExecutionResult};
use crate::lease::{WorkerLease, WorkerLeaseService};
use crate::state::{ControllerState, StateTransitionController, TaskResourceState};
use crate::util::{lock, panic_message};

/// Called exactly once when a build's execution unit finishes.
pub type CompletionCallback = Box<dyn FnOnce(ExecutionResult<()>) + Send>;

#[derive(Default)]
struct TaskQueue {
    queued: Vec<TaskHandle>,
    scheduled: Vec<TaskHandle>,
    known: HashSet<TaskHandle>,
}

/// Coordinates one build's part of the tree-wide task graph: collects the
/// tasks other builds ask for, schedules them into the build's work graph
/// and runs that graph on the executor.
pub struct BuildController {
    build: Arc<BuildState>,
    state: StateTransitionController<ControllerState>,
    tasks: Mutex<TaskQueue>,
    work_graph: Mutex<Option<Box<dyn BuildWorkGraph>>>,
    task_states: Mutex<HashMap<TaskHandle, TaskResourceState>>,
    task_completed: Condvar,
    waits_aborted: AtomicBool,
}

impl BuildController {
    pub fn new(build: Arc<BuildState>) -> Self {
        let state =
            StateTransitionController::new(build.identity().to_string(), ControllerState::DiscoveringTasks);
        Self {
            build,
            state,
            tasks: Mutex::new(TaskQueue::default()),
            work_graph: Mutex::new(None),
            task_states: Mutex::new(HashMap::new()),
            task_completed: Condvar::new(),
            waits_aborted: AtomicBool::new(false),
        }
    }

    pub fn build(&self) -> &Arc<BuildState> {
        &self.build
    }

    pub fn identity(&self) -> &BuildIdentity {
        self.build.identity()
    }

    pub fn state(&self) -> ControllerState {
        self.state.state()
    }

    pub fn scheduled_tasks(&self) -> Vec<TaskHandle> {
        lock(&self.tasks).scheduled.clone()
    }

    /// Queues `task` to be scheduled on the next scheduling pass. Tasks
    /// already queued or scheduled are ignored.
    pub fn queue_for_execution(&self, task: &TaskHandle) -> Result<(), CoordinatorError> {
        self.state.in_state(ControllerState::DiscoveringTasks, || {
            if task.build() != self.identity() {
                return Err(CoordinatorError::illegal_state(format!(
                    "task {task} does not belong to {}",
                    self.identity()
                )));
            }
            let mut tasks = lock(&self.tasks);
            if tasks.known.insert(task.clone()) {
                debug!(build = %self.identity(), task = %task, "queued task");
                tasks.queued.push(task.clone());
            }
            Ok(())
        })
    }

    /// Runs `action` against this build's work graph.
    pub fn populate_work_graph(
        &self,
        action: impl FnOnce(&mut dyn BuildWorkGraph) -> anyhow::Result<()>,
    ) -> Result<(), CoordinatorError> {
        self.state.in_state(ControllerState::DiscoveringTasks, || {
            self.with_work_graph(|graph| action(graph).map_err(CoordinatorError::from))
        })
    }

    /// Moves newly queued tasks into the work graph. Returns whether any
    /// task was scheduled.
    ///
    /// The queue lock is released before the work graph sees the tasks, so
    /// scheduling may request more tasks from this or any other build.
    pub fn schedule_queued_tasks(&self, locator: &dyn TaskLocator) -> Result<bool, CoordinatorError> {
        self.state.in_state(ControllerState::DiscoveringTasks, || {
            let batch: Vec<TaskHandle> = {
                let mut tasks = lock(&self.tasks);
                let batch: Vec<TaskHandle> = tasks.queued.drain(..).collect();
                tasks.scheduled.extend(batch.iter().cloned());
                batch
            };
            if batch.is_empty() {
                return Ok(false);
            }
            debug!(build = %self.identity(), count = batch.len(), "scheduling queued tasks");
            self.with_work_graph(|graph| {
                graph
                    .schedule(&batch, locator)
                    .map_err(CoordinatorError::from)
            })?;
            Ok(true)
        })
    }

    /// Checks the scheduled tasks for dependency cycles and finalizes the
    /// work graph. Every queued task must have been scheduled first.
    pub fn finalize_work_graph(&self) -> Result<(), CoordinatorError> {
        self.state.transition(
            ControllerState::DiscoveringTasks,
            ControllerState::ReadyToRun,
            || {
                let scheduled = {
                    let tasks = lock(&self.tasks);
                    if !tasks.queued.is_empty() {
                        return Err(CoordinatorError::illegal_state(format!(
                            "{} has {} queued tasks that have not been scheduled",
                            self.identity(),
                            tasks.queued.len()
                        )));
                    }
                    tasks.scheduled.clone()
                };
                let mut slot = lock(&self.work_graph);
                if let Some(graph) = slot.as_deref_mut() {
                    check_for_cycles(graph, self.identity(), &scheduled)?;
                    graph.finalize_graph()?;
                }
                debug!(build = %self.identity(), tasks = scheduled.len(), "finalized work graph");
                Ok(())
            },
        )
    }

    /// Submits this build's work to `executor` and returns without waiting.
    /// `on_complete` runs on the executor thread once the work is done.
    pub fn start_execution(
        self: &Arc<Self>,
        executor: &BuildExecutor,
        leases: &Arc<WorkerLeaseService>,
        on_complete: CompletionCallback,
    ) -> Result<(), CoordinatorError> {
        let graph = self.state.transition(
            ControllerState::ReadyToRun,
            ControllerState::Running,
            || Ok(lock(&self.work_graph).take()),
        )?;

        let controller = Arc::clone(self);
        let unit_leases = Arc::clone(leases);
        let parent = leases.current_worker_lease();
        leases.queue_unit();
        let submitted = executor.submit(move || {
            controller.run_build(graph, &unit_leases, parent, on_complete);
        });
        if let Err(err) = submitted {
            leases.forget_unit();
            let _ = self
                .state
                .transition_ignoring_failures(&[ControllerState::Running], ControllerState::Finished, || ());
            return Err(err);
        }
        Ok(())
    }

    pub fn task_state(&self, task: &TaskHandle) -> TaskResourceState {
        lock(&self.task_states)
            .get(task)
            .copied()
            .unwrap_or(TaskResourceState::Waiting)
    }

    /// Blocks the calling thread until `task` has completed, or until
    /// [`abort_waits`](Self::abort_waits) reports it as failed.
    pub fn await_task_completion(&self, task: &TaskHandle) -> TaskResourceState {
        let mut states = lock(&self.task_states);
        loop {
            if let Some(state) = states.get(task).copied().filter(|s| s.is_complete()) {
                return state;
            }
            if self.waits_aborted.load(Ordering::SeqCst) {
                debug!(task = %task, "wait aborted");
                return TaskResourceState::Failed;
            }
            states = self
                .task_completed
                .wait(states)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes every thread waiting in
    /// [`await_task_completion`](Self::await_task_completion) on this build
    /// and fails its waits, now and later.
    pub fn abort_waits(&self) {
        self.waits_aborted.store(true, Ordering::SeqCst);
        let _states = lock(&self.task_states);
        self.task_completed.notify_all();
    }

    /// Discards the work graph. Not allowed while the build is running.
    pub fn stop(&self) -> Result<(), CoordinatorError> {
        if self.state.state() == ControllerState::Running {
            return Err(CoordinatorError::illegal_state(format!(
                "cannot stop {} while it is running",
                self.identity()
            )));
        }
        if let Some(mut graph) = lock(&self.work_graph).take() {
            graph.stop()?;
        }
        Ok(())
    }

    fn with_work_graph<R>(
        &self,
        action: impl FnOnce(&mut dyn BuildWorkGraph) -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        let mut slot = lock(&self.work_graph);
        if slot.is_none() {
            *slot = Some(self.build.new_work_graph()?);
        }
        match slot.as_deref_mut() {
            Some(graph) => action(graph),
            None => Err(CoordinatorError::illegal_state(format!(
                "{} has no work graph",
                self.identity()
            ))),
        }
    }

    fn run_build(
        self: Arc<Self>,
        mut graph: Option<Box<dyn BuildWorkGraph>>,
        leases: &WorkerLeaseService,
        parent: Option<WorkerLease>,
        on_complete: CompletionCallback,
    ) {
        info!(build = %self.identity(), "executing build");
        let result = leases.run_as_unit(self.identity(), || {
            leases.with_shared_lease(parent, || {
                leases.run_as_worker_thread(|| match graph.as_deref_mut() {
                    None => ExecutionResult::ok(),
                    Some(graph) => panic::catch_unwind(AssertUnwindSafe(|| graph.run_work(&*self)))
                        .unwrap_or_else(|payload| {
                            ExecutionResult::failed(anyhow!(
                                "execution of {} panicked: {}",
                                self.identity(),
                                panic_message(payload.as_ref())
                            ))
                        }),
                })
            })
        });
        self.complete(graph, result, on_complete);
    }

    fn complete(
        &self,
        graph: Option<Box<dyn BuildWorkGraph>>,
        result: ExecutionResult<()>,
        on_complete: CompletionCallback,
    ) {
        let fallback = if result.is_success() {
            TaskResourceState::Success
        } else {
            TaskResourceState::Failed
        };
        let scheduled = self.scheduled_tasks();
        {
            let mut states = lock(&self.task_states);
            for task in scheduled {
                states.entry(task).or_insert(fallback);
            }
            self.task_completed.notify_all();
        }
        *lock(&self.work_graph) = graph;

        if result.is_success() {
            info!(build = %self.identity(), "build finished");
        } else {
            warn!(build = %self.identity(), failures = result.failures().len(), "build finished with failures");
        }
        if let Err(err) = self.state.transition_ignoring_failures(
            &[ControllerState::Running],
            ControllerState::Finished,
            || (),
        ) {
            error!(build = %self.identity(), error = %err, "could not mark build finished");
        }
        on_complete(result);
    }
}

impl TaskExecutionListener for BuildController {
    fn task_finished(&self, task: &TaskHandle, state: TaskResourceState) {
        if !state.is_complete() {
            return;
        }
        let mut states = lock(&self.task_states);
        match states.get(task) {
            Some(existing) if existing.is_complete() => {
                debug!(task = %task, ?existing, ?state, "ignoring repeated task completion");
            }
            _ => {
                states.insert(task.clone(), state);
                self.task_completed.notify_all();
            }
        }
    }
}

impl fmt::Debug for BuildController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildController")
            .field("build", self.identity())
            .field("state", &self.state())
            .finish()
    }
}
