use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::debug;

use super::model::{task_path, ScriptedBuild};
use crate::build::{BuildDefinition, BuildIdentity, BuildKind, TaskHandle};
use crate::controller::IncludedBuildTaskResource;
use crate::engine::{
    BuildEngine, BuildEngineFactory, BuildWorkGraph, TaskExecutionListener, TaskLocator,
};
use crate::executor::ExecutionResult;
use crate::state::TaskResourceState;
use crate::util::lock;

/// Tasks in the order they actually ran, across every scripted build.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    executed: Arc<Mutex<Vec<TaskHandle>>>,
}

impl ExecutionLog {
    pub fn executed(&self) -> Vec<TaskHandle> {
        lock(&self.executed).clone()
    }

    /// Position of `task` (a tree path such as `:b:check`) in the log.
    pub fn position(&self, task: &str) -> Option<usize> {
        lock(&self.executed)
            .iter()
            .position(|handle| handle.identity_path() == task)
    }

    fn record(&self, task: TaskHandle) {
        lock(&self.executed).push(task);
    }
}

/// Creates [`ScriptedBuild`]-driven engines, keyed by build path. Builds
/// without a script have no tasks.
#[derive(Default)]
pub struct ScriptedEngineFactory {
    builds: HashMap<BuildIdentity, Arc<ScriptedBuild>>,
    log: ExecutionLog,
}

impl ScriptedEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build_path: &str, script: ScriptedBuild) -> Self {
        self.builds.insert(
            BuildIdentity::from_path(build_path),
            Arc::new(script.normalized()),
        );
        self
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl BuildEngineFactory for ScriptedEngineFactory {
    fn create_engine(
        &self,
        identity: &BuildIdentity,
        kind: BuildKind,
        definition: &BuildDefinition,
    ) -> anyhow::Result<Box<dyn BuildEngine>> {
        debug!(build = %identity, ?kind, dir = %definition.root_dir().display(), "creating scripted engine");
        let script = self.builds.get(identity).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedEngine {
            identity: identity.clone(),
            script,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedEngine {
    identity: BuildIdentity,
    script: Arc<ScriptedBuild>,
    log: ExecutionLog,
}

impl BuildEngine for ScriptedEngine {
    fn configure(&self, locator: &dyn TaskLocator) -> anyhow::Result<()> {
        if let Some(message) = &self.script.configure_failure {
            bail!("{message}");
        }
        for request in &self.script.configure_requests {
            debug!(build = %self.identity, task = %request.identifier(), "requesting task during configuration");
            locator
                .locate_task(&request.identifier())?
                .queue_for_execution()?;
        }
        Ok(())
    }

    fn contains_task(&self, path: &str) -> bool {
        self.script.get(path).is_some()
    }

    fn new_work_graph(&self) -> Box<dyn BuildWorkGraph> {
        Box::new(ScriptedWorkGraph {
            identity: self.identity.clone(),
            script: Arc::clone(&self.script),
            log: self.log.clone(),
            scheduled: BTreeSet::new(),
            external: HashMap::new(),
            order: Vec::new(),
        })
    }
}

struct ScriptedWorkGraph {
    identity: BuildIdentity,
    script: Arc<ScriptedBuild>,
    log: ExecutionLog,
    scheduled: BTreeSet<String>,
    external: HashMap<String, Vec<IncludedBuildTaskResource>>,
    order: Vec<String>,
}

impl ScriptedWorkGraph {
    fn add(&mut self, path: &str, locator: &dyn TaskLocator) -> anyhow::Result<()> {
        let script = Arc::clone(&self.script);
        let mut pending = vec![task_path(path)];
        while let Some(path) = pending.pop() {
            if !self.scheduled.insert(path.clone()) {
                continue;
            }
            let task = script
                .get(&path)
                .ok_or_else(|| anyhow!("task '{path}' not found in {}", self.identity))?;
            pending.extend(task.depends_on.iter().rev().cloned());
            for dep in &task.depends_on_builds {
                let resource = locator.locate_task(&dep.identifier())?;
                resource.queue_for_execution()?;
                self.external.entry(path.clone()).or_default().push(resource);
            }
        }
        Ok(())
    }

    /// Appends `root` and its same-build dependencies to `order`,
    /// dependencies first.
    fn visit(&self, root: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(root.to_string()) {
            return;
        }
        let mut stack = vec![(root.to_string(), 0usize)];
        while let Some((path, next)) = stack.last_mut() {
            let deps = self
                .script
                .get(path)
                .map(|task| task.depends_on.as_slice())
                .unwrap_or_default();
            match deps.get(*next) {
                Some(dep) => {
                    *next += 1;
                    if visited.insert(dep.clone()) {
                        stack.push((dep.clone(), 0));
                    }
                }
                None => {
                    order.push(path.clone());
                    stack.pop();
                }
            }
        }
    }

    fn external_failed(&self, path: &str) -> bool {
        self.external
            .get(path)
            .map(|resources| {
                resources
                    .iter()
                    .any(|r| r.await_completion() != TaskResourceState::Success)
            })
            .unwrap_or(false)
    }
}

impl BuildWorkGraph for ScriptedWorkGraph {
    fn schedule(&mut self, tasks: &[TaskHandle], locator: &dyn TaskLocator) -> anyhow::Result<()> {
        for task in tasks {
            self.add(task.path(), locator)?;
        }
        Ok(())
    }

    fn dependencies(&self, task: &TaskHandle) -> Vec<TaskHandle> {
        let mut deps: Vec<TaskHandle> = self
            .script
            .get(task.path())
            .map(|t| {
                t.depends_on
                    .iter()
                    .map(|d| TaskHandle::new(self.identity.clone(), d.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(resources) = self.external.get(task.path()) {
            deps.extend(resources.iter().map(|r| r.task().clone()));
        }
        deps
    }

    fn finalize_graph(&mut self) -> anyhow::Result<()> {
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.scheduled.len());
        for path in &self.scheduled {
            self.visit(path, &mut visited, &mut order);
        }
        self.order = order;
        Ok(())
    }

    fn run_work(&mut self, listener: &dyn TaskExecutionListener) -> ExecutionResult<()> {
        let mut outcomes: HashMap<String, TaskResourceState> = HashMap::new();
        let mut failures = Vec::new();

        for path in &self.order {
            let Some(task) = self.script.get(path) else {
                continue;
            };
            let handle = TaskHandle::new(self.identity.clone(), path.as_str());

            let blocked = task
                .depends_on
                .iter()
                .any(|dep| outcomes.get(dep) != Some(&TaskResourceState::Success))
                || self.external_failed(path);
            if blocked {
                debug!(task = %handle, "skipping task, a dependency did not succeed");
                outcomes.insert(path.clone(), TaskResourceState::Failed);
                listener.task_finished(&handle, TaskResourceState::Failed);
                continue;
            }

            if task.duration_ms > 0 {
                thread::sleep(Duration::from_millis(task.duration_ms));
            }
            if task.panics {
                panic!("task {handle} panicked");
            }
            self.log.record(handle.clone());

            let state = match &task.fails {
                Some(message) => {
                    failures.push(anyhow!("Execution failed for task '{handle}': {message}"));
                    TaskResourceState::Failed
                }
                None => TaskResourceState::Success,
            };
            debug!(task = %handle, ?state, "task finished");
            outcomes.insert(path.clone(), state);
            listener.task_finished(&handle, state);
        }

        ExecutionResult::maybe_failed(failures)
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.external.clear();
        Ok(())
    }
}
