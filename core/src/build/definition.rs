use std::path::{Path, PathBuf};

/// What kind of build a [`super::BuildState`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildKind {
    Root,
    Included,
    Nested,
}

/// How an included or nested build was declared by its referrer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDefinition {
    name: Option<String>,
    root_dir: PathBuf,
    plugin_build: bool,
}

impl BuildDefinition {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            root_dir: root_dir.into(),
            plugin_build: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Plugin builds contribute build logic to their referrer and take part
    /// in plugin-build cycle detection.
    pub fn plugin_build(mut self, plugin_build: bool) -> Self {
        self.plugin_build = plugin_build;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn is_plugin_build(&self) -> bool {
        self.plugin_build
    }

    /// Declared name, falling back to the last component of the root directory.
    pub fn name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        self.root_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "build".to_string())
    }
}

/// The root build of the tree, with the project structure its settings
/// declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootBuildDefinition {
    pub root_dir: PathBuf,
    pub root_project_name: String,
    pub subproject_paths: Vec<String>,
}

impl RootBuildDefinition {
    pub fn new(root_dir: impl Into<PathBuf>, root_project_name: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            root_project_name: root_project_name.into(),
            subproject_paths: Vec::new(),
        }
    }

    pub fn with_subprojects<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subproject_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn as_build_definition(&self) -> BuildDefinition {
        BuildDefinition::new(self.root_dir.clone()).with_name(self.root_project_name.clone())
    }
}
