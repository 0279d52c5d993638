use std::sync::Mutex;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::error::CoordinatorError;
use crate::util::lock;

/// Thread pool that runs build execution units.
///
/// Units are blocking work, so they go to the blocking pool of a dedicated
/// tokio runtime whose threads carry the configured name.
pub struct BuildExecutor {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl BuildExecutor {
    pub fn new(config: &ExecutionConfig) -> Result<Self, CoordinatorError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.pool_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| CoordinatorError::ExecutorUnavailable(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    pub fn submit(&self, unit: impl FnOnce() + Send + 'static) -> Result<(), CoordinatorError> {
        if lock(&self.runtime).is_none() {
            return Err(CoordinatorError::ExecutorUnavailable(
                "executor has been shut down".to_string(),
            ));
        }
        // Completion is reported by the unit itself.
        drop(self.handle.spawn_blocking(unit));
        Ok(())
    }

    /// Stops accepting work. Units already running are left to finish on
    /// their own threads.
    pub fn shutdown(&self) {
        if let Some(runtime) = lock(&self.runtime).take() {
            debug!("shutting down build executor");
            runtime.shutdown_background();
        }
    }
}

impl Drop for BuildExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_units_run_on_named_threads() {
        let config = ExecutionConfig {
            thread_name: "test-builds".to_string(),
            ..ExecutionConfig::default()
        };
        let executor = BuildExecutor::new(&config).unwrap();
        let (tx, rx) = mpsc::channel();
        executor
            .submit(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            })
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-builds"));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let executor = BuildExecutor::new(&ExecutionConfig::default()).unwrap();
        executor.shutdown();
        let err = executor.submit(|| {}).unwrap_err();
        assert!(matches!(err, CoordinatorError::ExecutorUnavailable(_)));
    }
}
