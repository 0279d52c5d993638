mod load;
mod types;

pub use load::{apply_env_overrides, get_buildtree_home, load_default, load_from_path, validate};
pub use types::{CompositeConfig, ExecutionConfig, LoggingConfig};
