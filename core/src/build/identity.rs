use std::cmp::Ordering;
use std::fmt;

/// Immutable name of a build in the tree, keyed by its build path.
///
/// The root build is `:`, included builds are `:name` and nested builds
/// append their name to the owner's path (`:parent:name`).
///
/// Ordering puts every non-root build first, sorted by path, and the root
/// build last. All per-build iteration uses this order.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BuildIdentity {
    path: String,
}

impl BuildIdentity {
    pub fn root() -> Self {
        Self {
            path: ":".to_string(),
        }
    }

    pub fn included(name: &str) -> Self {
        Self {
            path: format!(":{}", name.trim_start_matches(':')),
        }
    }

    pub fn nested(owner: &BuildIdentity, name: &str) -> Self {
        let name = name.trim_start_matches(':');
        if owner.is_root() {
            Self::included(name)
        } else {
            Self {
                path: format!("{}:{}", owner.path, name),
            }
        }
    }

    /// Parses a build path such as `:` or `:parent:name`.
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim().trim_matches(':');
        if trimmed.is_empty() {
            Self::root()
        } else {
            Self {
                path: format!(":{trimmed}"),
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == ":"
    }

    /// Last segment of the path, `:` for the root build.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return &self.path;
        }
        self.path.rsplit(':').next().unwrap_or(&self.path)
    }
}

impl Ord for BuildIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.is_root()
            .cmp(&other.is_root())
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for BuildIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "root build")
        } else {
            write!(f, "build '{}'", self.path)
        }
    }
}

impl fmt::Debug for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildIdentity({})", self.path)
    }
}
