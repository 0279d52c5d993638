use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::BuildRegistry;
use crate::build::{BuildDefinition, BuildIdentity, BuildKind, BuildState, RootBuildDefinition};
use crate::engine::BuildEngineFactory;
use crate::error::CoordinatorError;
use crate::executor::ExecutionResult;
use crate::util::lock;

#[derive(Default)]
struct Builds {
    root: Option<(RootBuildDefinition, Arc<BuildState>)>,
    by_dir: HashMap<PathBuf, Arc<BuildState>>,
    by_identity: HashMap<BuildIdentity, Arc<BuildState>>,
    included: Vec<Arc<BuildState>>,
    nested: Vec<Arc<BuildState>>,
}

/// Registry of every build in the tree, deduplicated by root directory.
///
/// All maps sit behind one lock; registration is rare and never calls back
/// into the registry.
pub struct DefaultBuildRegistry {
    factory: Arc<dyn BuildEngineFactory>,
    builds: Mutex<Builds>,
}

impl DefaultBuildRegistry {
    pub fn new(factory: Arc<dyn BuildEngineFactory>) -> Self {
        Self {
            factory,
            builds: Mutex::new(Builds::default()),
        }
    }

    fn create(
        &self,
        identity: BuildIdentity,
        kind: BuildKind,
        definition: BuildDefinition,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        let engine = self
            .factory
            .create_engine(&identity, kind, &definition)
            .map_err(|e| e.context(format!("failed to create engine for {identity}")))?;
        Ok(Arc::new(BuildState::new(identity, kind, definition, engine)))
    }

    /// Returns the build already registered for the definition's directory,
    /// if any.
    fn existing(builds: &Builds, definition: &BuildDefinition) -> Option<Arc<BuildState>> {
        let existing = builds.by_dir.get(definition.root_dir())?;
        if existing.kind() != BuildKind::Root && existing.definition() != definition {
            debug!(
                build = %existing.identity(),
                dir = %definition.root_dir().display(),
                "build already registered with a different definition, keeping the first"
            );
        }
        Some(Arc::clone(existing))
    }

    fn register(&self, builds: &mut Builds, state: &Arc<BuildState>) {
        builds
            .by_dir
            .insert(state.definition().root_dir().to_path_buf(), Arc::clone(state));
        builds
            .by_identity
            .entry(state.identity().clone())
            .or_insert_with(|| Arc::clone(state));
    }
}

impl BuildRegistry for DefaultBuildRegistry {
    fn add_root_build(
        &self,
        definition: RootBuildDefinition,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        let mut builds = lock(&self.builds);
        if builds.root.is_some() {
            return Err(CoordinatorError::illegal_state(
                "the root build has already been registered",
            ));
        }
        let state = self.create(
            BuildIdentity::root(),
            BuildKind::Root,
            definition.as_build_definition(),
        )?;
        self.register(&mut builds, &state);
        builds.root = Some((definition, Arc::clone(&state)));
        info!(dir = %state.definition().root_dir().display(), "registered root build");
        Ok(state)
    }

    fn add_included_build(
        &self,
        definition: BuildDefinition,
        referrer: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        let mut builds = lock(&self.builds);
        if let Some(existing) = Self::existing(&builds, &definition) {
            return Ok(existing);
        }
        let identity = BuildIdentity::included(&definition.name());
        let state = self.create(identity, BuildKind::Included, definition)?;
        self.register(&mut builds, &state);
        builds.included.push(Arc::clone(&state));
        info!(build = %state.identity(), referrer = %referrer, "registered included build");
        Ok(state)
    }

    fn add_nested_build(
        &self,
        definition: BuildDefinition,
        owner: &BuildIdentity,
    ) -> Result<Arc<BuildState>, CoordinatorError> {
        let mut builds = lock(&self.builds);
        if !builds.by_identity.contains_key(owner) {
            return Err(CoordinatorError::UnknownBuild(owner.clone()));
        }
        if let Some(existing) = Self::existing(&builds, &definition) {
            return Ok(existing);
        }
        let identity = BuildIdentity::nested(owner, &definition.name());
        let state = self.create(identity, BuildKind::Nested, definition)?;
        self.register(&mut builds, &state);
        builds.nested.push(Arc::clone(&state));
        info!(build = %state.identity(), owner = %owner, "registered nested build");
        Ok(state)
    }

    fn root_build(&self) -> Option<Arc<BuildState>> {
        lock(&self.builds)
            .root
            .as_ref()
            .map(|(_, state)| Arc::clone(state))
    }

    fn included_builds(&self) -> Vec<Arc<BuildState>> {
        lock(&self.builds).included.clone()
    }

    fn get_build(&self, build: &BuildIdentity) -> Option<Arc<BuildState>> {
        lock(&self.builds).by_identity.get(build).cloned()
    }

    fn finalize_included_builds(&self) -> Result<Vec<Arc<BuildState>>, CoordinatorError> {
        let builds = lock(&self.builds);
        let root = builds.root.as_ref().map(|(definition, _)| definition);
        let mut seen: HashMap<String, &Arc<BuildState>> = HashMap::new();

        for build in &builds.included {
            let name = build.definition().name();
            let dir = build.definition().root_dir().display();
            if let Some(first) = seen.insert(name.clone(), build) {
                return Err(CoordinatorError::Configuration(format!(
                    "Included build {dir} has build name '{name}' which is the same as included build {}",
                    first.definition().root_dir().display()
                )));
            }
            if let Some(root) = root {
                if root.root_project_name == name {
                    return Err(CoordinatorError::Configuration(format!(
                        "Included build {dir} has build name '{name}' which is the same as the root project name of the root build"
                    )));
                }
                let project_path = format!(":{name}");
                if root
                    .subproject_paths
                    .iter()
                    .any(|p| normalize_project_path(p) == project_path)
                {
                    return Err(CoordinatorError::Configuration(format!(
                        "Included build {dir} has build path ':{name}' which is the same as project path {project_path} of the root build"
                    )));
                }
            }
        }

        info!(count = builds.included.len(), "included builds finalized");
        Ok(builds.included.clone())
    }

    fn stop_all(&self) -> ExecutionResult<()> {
        let mut all: Vec<Arc<BuildState>> = {
            let builds = lock(&self.builds);
            builds.by_dir.values().cloned().collect()
        };
        all.sort_by(|a, b| a.identity().cmp(b.identity()));

        let failures = all
            .iter()
            .filter_map(|build| build.stop().err())
            .collect();
        ExecutionResult::maybe_failed(failures)
    }
}

fn normalize_project_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with(':') {
        path.to_string()
    } else {
        format!(":{path}")
    }
}
