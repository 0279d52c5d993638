//! Builds participating in the tree and how tasks inside them are named.

mod definition;
mod identity;
mod state;
mod task;

pub use definition::{BuildDefinition, BuildKind, RootBuildDefinition};
pub use identity::BuildIdentity;
pub use state::{BuildLifecycle, BuildState};
pub use task::{TaskHandle, TaskIdentifier};
