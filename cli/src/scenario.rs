//! Scenario files: a root build, the builds it includes and what each of
//! them does, in TOML.
//!
//! ```toml
//! [root]
//! dir = "app"
//! requests = [":b:check", ":c:build"]
//!
//! [[builds]]
//! dir = "libs/b"
//! configure_requests = [{ build = ":c", task = ":assemble" }]
//! [builds.tasks.":check"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use buildtree_core::api::{
    BuildDefinition, BuildIdentity, BuildRegistry, BuildState, CoordinatorError,
    RootBuildDefinition, ScriptedBuild, ScriptedEngineFactory, TaskIdentifier,
};
use serde::Deserialize;

use crate::error::CliError;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub root: RootSection,

    #[serde(default)]
    pub builds: Vec<IncludedSection>,

    #[serde(default)]
    pub nested: Vec<NestedSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootSection {
    pub dir: PathBuf,

    /// Defaults to the name of `dir`.
    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub subprojects: Vec<String>,

    /// Tasks to run, as tree paths (`:check` in the root build, `:b:check`
    /// in build `b`).
    #[serde(default)]
    pub requests: Vec<String>,

    #[serde(flatten)]
    pub script: ScriptedBuild,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncludedSection {
    pub dir: PathBuf,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub plugin: bool,

    /// Build path of the build that includes this one.
    #[serde(default = "default_included_by")]
    pub included_by: String,

    #[serde(flatten)]
    pub script: ScriptedBuild,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedSection {
    pub dir: PathBuf,

    #[serde(default)]
    pub name: Option<String>,

    /// Build path of the owning build.
    pub owner: String,

    #[serde(flatten)]
    pub script: ScriptedBuild,
}

fn default_included_by() -> String {
    ":".to_string()
}

impl Scenario {
    /// Reads a scenario. Relative build directories are taken relative to
    /// the scenario file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Scenario(format!("failed to read {}: {e}", path.display())))?;
        let mut scenario: Scenario = toml::from_str(&text)
            .map_err(|e| CliError::Scenario(format!("failed to parse {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        scenario.resolve_dirs(base);
        Ok(scenario)
    }

    fn resolve_dirs(&mut self, base: &Path) {
        let resolve = |dir: &mut PathBuf| {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        };
        resolve(&mut self.root.dir);
        self.builds.iter_mut().for_each(|b| resolve(&mut b.dir));
        self.nested.iter_mut().for_each(|n| resolve(&mut n.dir));
    }

    pub fn root_definition(&self) -> RootBuildDefinition {
        let project_name = self.root.project_name.clone().unwrap_or_else(|| {
            self.root
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string())
        });
        RootBuildDefinition::new(&self.root.dir, project_name)
            .with_subprojects(self.root.subprojects.iter().cloned())
    }

    /// One scripted engine per declared build, keyed by the path each build
    /// will be registered under.
    pub fn engines(&self) -> ScriptedEngineFactory {
        let mut engines =
            ScriptedEngineFactory::new().with_build(":", self.root.script.clone());
        for build in &self.builds {
            let identity = BuildIdentity::included(&build.definition().name());
            engines = engines.with_build(identity.path(), build.script.clone());
        }
        for nested in &self.nested {
            let owner = BuildIdentity::from_path(&nested.owner);
            let identity = BuildIdentity::nested(&owner, &nested.definition().name());
            engines = engines.with_build(identity.path(), nested.script.clone());
        }
        engines
    }

    /// Registers every build in file order and validates the included
    /// build names.
    pub fn register(
        &self,
        registry: &dyn BuildRegistry,
    ) -> Result<Vec<Arc<BuildState>>, CoordinatorError> {
        let root = registry.add_root_build(self.root_definition())?;
        let mut builds = vec![root];
        for build in &self.builds {
            let referrer = BuildIdentity::from_path(&build.included_by);
            builds.push(registry.add_included_build(build.definition(), &referrer)?);
        }
        for nested in &self.nested {
            let owner = BuildIdentity::from_path(&nested.owner);
            builds.push(registry.add_nested_build(nested.definition(), &owner)?);
        }
        registry.finalize_included_builds()?;
        Ok(builds)
    }

    pub fn requests(&self) -> Vec<TaskIdentifier> {
        self.root.requests.iter().map(|r| parse_task_path(r)).collect()
    }
}

impl IncludedSection {
    fn definition(&self) -> BuildDefinition {
        let definition = BuildDefinition::new(&self.dir).plugin_build(self.plugin);
        match &self.name {
            Some(name) => definition.with_name(name),
            None => definition,
        }
    }
}

impl NestedSection {
    fn definition(&self) -> BuildDefinition {
        let definition = BuildDefinition::new(&self.dir);
        match &self.name {
            Some(name) => definition.with_name(name),
            None => definition,
        }
    }
}

/// Splits a tree path such as `:b:check` into its build and task parts.
/// A single-segment path names a task of the root build.
pub fn parse_task_path(path: &str) -> TaskIdentifier {
    let path = path.trim();
    let path = if path.starts_with(':') {
        path.to_string()
    } else {
        format!(":{path}")
    };
    match path.rfind(':') {
        Some(split) if split > 0 => TaskIdentifier::by_path(
            BuildIdentity::from_path(&path[..split]),
            &path[split..],
        ),
        _ => TaskIdentifier::by_path(BuildIdentity::root(), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCENARIO: &str = r#"
        [root]
        dir = "app"
        subprojects = [":core"]
        requests = [":b:check", "c:build", ":assemble"]

        [root.tasks.":assemble"]

        [[builds]]
        dir = "libs/b"
        configure_requests = [{ build = ":c", task = ":assemble" }]
        [builds.tasks.":check"]

        [[builds]]
        dir = "/abs/c"
        plugin = true
        [builds.tasks.":assemble"]
        fails = "compilation failed"
        [builds.tasks.":build"]

        [[nested]]
        dir = "libs/b/buildSrc"
        owner = ":b"
    "#;

    fn load(text: &str) -> (tempfile::TempDir, Scenario) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.toml");
        std::fs::write(&path, text).unwrap();
        let scenario = Scenario::load(&path).unwrap();
        (dir, scenario)
    }

    #[test]
    fn test_load_scenario() {
        let (dir, scenario) = load(SCENARIO);
        assert_eq!(scenario.root.dir, dir.path().join("app"));
        assert_eq!(scenario.builds.len(), 2);
        assert_eq!(scenario.builds[0].dir, dir.path().join("libs/b"));
        assert_eq!(scenario.builds[1].dir, PathBuf::from("/abs/c"));
        assert!(scenario.builds[1].plugin);
        assert_eq!(scenario.builds[0].included_by, ":");
        assert_eq!(scenario.builds[0].script.configure_requests.len(), 1);
        assert_eq!(
            scenario.builds[1].script.tasks[":assemble"].fails.as_deref(),
            Some("compilation failed")
        );
        assert_eq!(scenario.nested[0].owner, ":b");
        assert_eq!(scenario.root_definition().root_project_name, "app");
    }

    #[test]
    fn test_requests_are_tree_paths() {
        let (_dir, scenario) = load(SCENARIO);
        assert_eq!(
            scenario.requests(),
            vec![
                TaskIdentifier::by_path(BuildIdentity::included("b"), ":check"),
                TaskIdentifier::by_path(BuildIdentity::included("c"), ":build"),
                TaskIdentifier::by_path(BuildIdentity::root(), ":assemble"),
            ]
        );
        assert_eq!(
            parse_task_path(":b:inner:compile"),
            TaskIdentifier::by_path(BuildIdentity::from_path(":b:inner"), ":compile")
        );
    }

    #[test]
    fn test_invalid_scenario_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[builds]]\ndir = \"x\"\n").unwrap();
        let err = Scenario::load(&path).unwrap_err();
        assert!(matches!(err, CliError::Scenario(_)), "{err}");
    }

    #[test]
    fn test_demo_scenario_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/composite.toml");
        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.builds.len(), 2);
        assert!(scenario.builds[1].plugin);
        assert_eq!(scenario.nested[0].owner, ":lib");
        assert_eq!(
            scenario.requests()[1],
            TaskIdentifier::by_path(BuildIdentity::included("lib"), ":check")
        );
    }
}
