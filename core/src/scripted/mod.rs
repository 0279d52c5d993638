//! A declarative build engine: each build lists its tasks, what they depend
//! on (in the same build or in other builds) and how they fail.
//!
//! The `buildtree` binary runs scenarios with it, and the tests use it to
//! drive the coordinator end to end.

mod engine;
mod model;

pub use engine::{ExecutionLog, ScriptedEngineFactory};
pub use model::{ScriptedBuild, ScriptedTask, TaskRef};
