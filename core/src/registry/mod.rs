//! The builds that make up the tree.

mod acyclic;
mod default;

pub use acyclic::AcyclicBuildRegistry;
pub use default::DefaultBuildRegistry;

use std::sync::Arc;

use crate::build::{BuildDefinition, BuildIdentity, BuildState, RootBuildDefinition};
use crate::error::CoordinatorError;
use crate::executor::ExecutionResult;

pub trait BuildRegistry: Send + Sync {
    /// Registers the root build. There is exactly one per tree.
    fn add_root_build(
        &self,
        definition: RootBuildDefinition,
    ) -> Result<Arc<BuildState>, CoordinatorError>;

    /// Registers a build included by `referrer`. Registering the same root
    /// directory again returns the build registered first.
    fn add_included_build(
        &self,
        definition: BuildDefinition,
        referrer: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError>;

    /// Registers a build owned by another build, named below its owner.
    fn add_nested_build(
        &self,
        definition: BuildDefinition,
        owner: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError>;

    fn root_build(&self) -> Option<Arc<BuildState>>;

    /// Included builds in registration order.
    fn included_builds(&self) -> Vec<Arc<BuildState>>;

    fn get_build(&self, build: &BuildIdentity) -> Option<Arc<BuildState>>;

    /// Validates the names of the included builds against each other and
    /// against the root build's projects.
    fn finalize_included_builds(&self) -> Result<Vec<Arc<BuildState>>, CoordinatorError>;

    /// Stops every registered build, collecting all failures.
    fn stop_all(&self) -> ExecutionResult<()>;
}
