//! Per-build controllers and the set that drives them through population
//! and execution.

mod build;
mod resource;
mod set;

pub use build::{BuildController, CompletionCallback};
pub use resource::IncludedBuildTaskResource;
pub use set::{BuildControllers, ControllerSetFactory};
