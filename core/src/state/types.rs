use serde::{Deserialize, Serialize};

/// Lifecycle of a per-build controller within one task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    DiscoveringTasks,
    ReadyToRun,
    Running,
    Finished,
}

/// Lifecycle of the build tree task graph facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGraphState {
    QueuingTasks,
    ReadyToRun,
    Running,
    Finished,
}

/// Completion state of a task as seen from other builds.
///
/// Moves forward only: a task leaves `Waiting` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResourceState {
    Waiting,
    Success,
    Failed,
}

impl TaskResourceState {
    pub fn is_complete(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}
