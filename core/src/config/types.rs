use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Rejects plugin builds that include each other.
    #[serde(default)]
    pub isolated_projects: bool,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "buildtree_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker leases available to the whole tree.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Upper bound on threads in the build executor pool.
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,

    /// How often a waiting build tree checks the health of its workers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_max_workers() -> usize {
    num_cpus::get()
}

fn default_pool_threads() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_thread_name() -> String {
    "included-builds".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            pool_threads: default_pool_threads(),
            poll_interval_ms: default_poll_interval_ms(),
            thread_name: default_thread_name(),
        }
    }
}
