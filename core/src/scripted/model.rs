use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::build::{BuildIdentity, TaskIdentifier};

/// A task in another build, e.g. `{ build = ":c", task = ":assemble" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub build: String,
    pub task: String,
}

impl TaskRef {
    pub fn new(build: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            build: build.into(),
            task: task.into(),
        }
    }

    pub fn identifier(&self) -> TaskIdentifier {
        TaskIdentifier::by_path(BuildIdentity::from_path(&self.build), task_path(&self.task))
    }
}

/// Declarative description of what one build does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedBuild {
    #[serde(default)]
    pub tasks: BTreeMap<String, ScriptedTask>,

    /// Tasks of other builds requested while this build is configured.
    #[serde(default)]
    pub configure_requests: Vec<TaskRef>,

    /// Makes configuration fail with this message.
    #[serde(default)]
    pub configure_failure: Option<String>,
}

impl ScriptedBuild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, path: &str, task: ScriptedTask) -> Self {
        self.tasks.insert(task_path(path), task);
        self
    }

    pub fn requests_on_configure(mut self, task: TaskRef) -> Self {
        self.configure_requests.push(task);
        self
    }

    pub fn fails_to_configure(mut self, message: impl Into<String>) -> Self {
        self.configure_failure = Some(message.into());
        self
    }

    pub(crate) fn get(&self, path: &str) -> Option<&ScriptedTask> {
        self.tasks.get(&task_path(path))
    }

    /// Rewrites every task path into its `:name` form.
    pub(crate) fn normalized(mut self) -> Self {
        self.tasks = std::mem::take(&mut self.tasks)
            .into_iter()
            .map(|(path, mut task)| {
                task.depends_on = task.depends_on.iter().map(|d| task_path(d)).collect();
                (task_path(&path), task)
            })
            .collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedTask {
    /// Tasks of the same build that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Tasks of other builds that must complete first.
    #[serde(default)]
    pub depends_on_builds: Vec<TaskRef>,

    /// Makes the task fail with this message.
    #[serde(default)]
    pub fails: Option<String>,

    #[serde(default)]
    pub panics: bool,

    #[serde(default)]
    pub duration_ms: u64,
}

impl ScriptedTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on(mut self, path: &str) -> Self {
        self.depends_on.push(task_path(path));
        self
    }

    pub fn depends_on_build(mut self, build: &str, task: &str) -> Self {
        self.depends_on_builds.push(TaskRef::new(build, task));
        self
    }

    pub fn fails(mut self, message: impl Into<String>) -> Self {
        self.fails = Some(message.into());
        self
    }

    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = millis;
        self
    }
}

/// `check` and `:check` name the same task.
pub(crate) fn task_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with(':') {
        path.to_string()
    } else {
        format!(":{path}")
    }
}
