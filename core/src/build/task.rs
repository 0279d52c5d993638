use std::fmt;

use super::BuildIdentity;

/// A task within a specific build.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    build: BuildIdentity,
    path: String,
}

impl TaskHandle {
    pub fn new(build: BuildIdentity, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with(':') {
            path
        } else {
            format!(":{path}")
        };
        Self { build, path }
    }

    pub fn build(&self) -> &BuildIdentity {
        &self.build
    }

    /// Task path relative to its build, e.g. `:check`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the task within the whole tree, e.g. `:b:check`.
    pub fn identity_path(&self) -> String {
        if self.build.is_root() {
            self.path.clone()
        } else {
            format!("{}{}", self.build.path(), self.path)
        }
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity_path())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.identity_path())
    }
}

/// How a caller names a task it wants to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskIdentifier {
    /// An already resolved task.
    Handle(TaskHandle),
    /// A task path that the target build has to resolve, configuring the
    /// build first if needed.
    Path { build: BuildIdentity, path: String },
}

impl TaskIdentifier {
    pub fn of(handle: TaskHandle) -> Self {
        Self::Handle(handle)
    }

    pub fn by_path(build: BuildIdentity, path: impl Into<String>) -> Self {
        Self::Path {
            build,
            path: path.into(),
        }
    }

    pub fn build(&self) -> &BuildIdentity {
        match self {
            Self::Handle(handle) => handle.build(),
            Self::Path { build, .. } => build,
        }
    }
}

impl fmt::Display for TaskIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "{handle}"),
            Self::Path { build, path } => write!(f, "{path} in {build}"),
        }
    }
}
