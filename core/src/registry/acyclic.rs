use std::sync::Arc;

use tracing::warn;

use super::BuildRegistry;
use crate::build::{BuildDefinition, BuildIdentity, BuildState, RootBuildDefinition};
use crate::cycle::CycleDetector;
use crate::error::CoordinatorError;
use crate::executor::ExecutionResult;

/// Rejects plugin builds that (transitively) include themselves.
///
/// Each plugin-build inclusion records an edge from the referrer to the
/// included build. Library builds may form cycles and are registered as
/// acyclic nodes instead.
pub struct AcyclicBuildRegistry<R> {
    delegate: R,
    detector: CycleDetector<BuildIdentity>,
}

impl<R: BuildRegistry> AcyclicBuildRegistry<R> {
    pub fn new(delegate: R) -> Self {
        Self {
            delegate,
            detector: CycleDetector::new(),
        }
    }
}

impl<R: BuildRegistry> BuildRegistry for AcyclicBuildRegistry<R> {
    fn add_root_build(
        &self,
        definition: RootBuildDefinition,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        self.delegate.add_root_build(definition)
    }

    fn add_included_build(
        &self,
        definition: BuildDefinition,
        referrer: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        let plugin_build = definition.is_plugin_build();
        let build = self.delegate.add_included_build(definition, referrer)?;
        if plugin_build {
            if let Some(cycle) = self
                .detector
                .add_edge(referrer.clone(), build.identity().clone())
            {
                let path = cycle.render(|b| b.path().to_string());
                warn!(cycle = %path, "plugin build cycle detected");
                return Err(CoordinatorError::BuildCycle { path });
            }
        } else {
            self.detector.add_acyclic_node(build.identity().clone());
        }
        Ok(build)
    }

    fn add_nested_build(
        &self,
        definition: BuildDefinition,
        owner: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        self.delegate.add_nested_build(definition, owner)
    }

    fn root_build(&self) -> Option<Arc<BuildState>> {
        self.delegate.root_build()
    }

    fn included_builds(&self) -> Vec<Arc<BuildState>> {
        self.delegate.included_builds()
    }

    fn get_build(&self, build: &BuildIdentity) -> Option<Arc<BuildState>> {
        self.delegate.get_build(build)
    }

    fn finalize_included_builds(&self) -> Result<Vec<Arc<BuildState>>, CoordinatorError> {
        self.delegate.finalize_included_builds()
    }

    fn stop_all(&self) -> ExecutionResult<()> {
        self.delegate.stop_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DefaultBuildRegistry;
    use crate::scripted::ScriptedEngineFactory;
    use pretty_assertions::assert_eq;

    fn registry() -> AcyclicBuildRegistry<DefaultBuildRegistry> {
        let registry = AcyclicBuildRegistry::new(DefaultBuildRegistry::new(Arc::new(
            ScriptedEngineFactory::new(),
        )));
        registry
            .add_root_build(RootBuildDefinition::new("/work/app", "app"))
            .unwrap();
        registry
    }

    fn plugin(dir: &str) -> BuildDefinition {
        BuildDefinition::new(dir).plugin_build(true)
    }

    #[test]
    fn test_plugin_build_cycle_is_rejected() {
        let registry = registry();
        let root = BuildIdentity::root();
        let p1 = registry.add_included_build(plugin("/work/p1"), &root).unwrap();
        let p2 = registry
            .add_included_build(plugin("/work/p2"), p1.identity())
            .unwrap();
        let err = registry
            .add_included_build(plugin("/work/p1"), p2.identity())
            .unwrap_err();
        match err {
            CoordinatorError::BuildCycle { path } => assert_eq!(path, ":p2 -> :p1 -> :p2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plugin_build_including_itself() {
        let registry = registry();
        let p = registry
            .add_included_build(plugin("/work/p"), &BuildIdentity::root())
            .unwrap();
        let err = registry
            .add_included_build(plugin("/work/p"), p.identity())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::BuildCycle { .. }));
    }

    #[test]
    fn test_library_builds_may_include_each_other() {
        let registry = registry();
        let root = BuildIdentity::root();
        let a = registry
            .add_included_build(BuildDefinition::new("/work/a"), &root)
            .unwrap();
        let b = registry
            .add_included_build(BuildDefinition::new("/work/b"), a.identity())
            .unwrap();
        let again = registry
            .add_included_build(BuildDefinition::new("/work/a"), b.identity())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[test]
    fn test_plugin_build_including_the_root_build() {
        let registry = registry();
        let root = BuildIdentity::root();
        let p = registry.add_included_build(plugin("/work/p"), &root).unwrap();
        let err = registry
            .add_included_build(plugin("/work/app"), p.identity())
            .unwrap_err();
        match err {
            CoordinatorError::BuildCycle { path } => assert_eq!(path, ":p -> : -> :p"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
