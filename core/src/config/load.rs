use std::path::{Path, PathBuf};

use super::types::CompositeConfig;
use crate::error::ConfigError;

/// Get the default buildtree data directory: `$BUILDTREE_HOME` or ~/.buildtree
pub fn get_buildtree_home() -> Result<PathBuf, ConfigError> {
    if let Ok(v) = std::env::var("BUILDTREE_HOME") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".buildtree"))
        .ok_or(ConfigError::NoHome)
}

pub fn load_from_path(path: &Path) -> Result<CompositeConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<CompositeConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the configuration, looking in order at:
///
/// 1. `explicit`, when given (must exist)
/// 2. `$BUILDTREE_HOME/config.toml` or `~/.buildtree/config.toml`
/// 3. `./buildtree.toml`
/// 4. built-in defaults
///
/// Environment variables override whatever was loaded.
pub fn load_default(explicit: Option<&Path>) -> Result<CompositeConfig, ConfigError> {
    let mut cfg = match explicit {
        Some(path) => load_from_path(path)?,
        None => {
            let home_config = get_buildtree_home()
                .map(|home| home.join("config.toml"))
                .ok();
            let local_config = Path::new("buildtree.toml");

            match home_config {
                Some(path) if path.exists() => load_from_path(&path)?,
                _ if local_config.exists() => load_from_path(local_config)?,
                _ => CompositeConfig::default(),
            }
        }
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides(
    cfg: &mut CompositeConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = env("BUILDTREE_MAX_WORKERS").filter(|v| !v.trim().is_empty()) {
        cfg.execution.max_workers = v.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "BUILDTREE_MAX_WORKERS",
            message: format!("'{v}' is not a number"),
        })?;
    }
    if let Some(v) = env("BUILDTREE_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
        cfg.logging.level = v;
    }
    if let Some(v) = env("BUILDTREE_ISOLATED_PROJECTS").filter(|v| !v.trim().is_empty()) {
        cfg.isolated_projects = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    Ok(())
}

pub fn validate(cfg: &CompositeConfig) -> Result<(), ConfigError> {
    if cfg.execution.max_workers == 0 {
        return Err(ConfigError::Invalid {
            key: "execution.max_workers",
            message: "must be at least 1".to_string(),
        });
    }
    if cfg.execution.pool_threads == 0 {
        return Err(ConfigError::Invalid {
            key: "execution.pool_threads",
            message: "must be at least 1".to_string(),
        });
    }
    if cfg.execution.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid {
            key: "execution.poll_interval_ms",
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}
