#![allow(dead_code)]

use std::sync::Arc;

use buildtree_core::api::{
    BuildDefinition, BuildIdentity, BuildRegistry, BuildTreeServices, BuildTreeWorkGraph,
    CompositeConfig, ExecutionConfig, RootBuildDefinition, TaskIdentifier,
};
use buildtree_core::engine::BuildEngineFactory;

/// Routes coordinator logs through the test harness; `RUST_LOG` selects the
/// level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(max_workers: usize) -> CompositeConfig {
    CompositeConfig {
        execution: ExecutionConfig {
            max_workers,
            poll_interval_ms: 10,
            ..ExecutionConfig::default()
        },
        ..CompositeConfig::default()
    }
}

/// Services for a root build at `/work/app` including one build per name,
/// each at `/work/<name>`.
pub fn services(
    engines: impl BuildEngineFactory + 'static,
    included: &[&str],
) -> BuildTreeServices {
    services_with_config(config(4), engines, included)
}

pub fn services_with_config(
    config: CompositeConfig,
    engines: impl BuildEngineFactory + 'static,
    included: &[&str],
) -> BuildTreeServices {
    init_logging();
    let services = BuildTreeServices::new(config, Arc::new(engines)).unwrap();
    let registry = services.registry();
    registry
        .add_root_build(RootBuildDefinition::new("/work/app", "app"))
        .unwrap();
    let root = BuildIdentity::root();
    for name in included {
        registry
            .add_included_build(BuildDefinition::new(format!("/work/{name}")), &root)
            .unwrap();
    }
    registry.finalize_included_builds().unwrap();
    services
}

/// Locates `task` (e.g. `:b:check`, or `:check` for the root build) and
/// queues it.
pub fn request(graph: &BuildTreeWorkGraph, task: &str) {
    let (build, path) = match task.rfind(':') {
        Some(0) | None => (BuildIdentity::root(), task.to_string()),
        Some(split) => (
            BuildIdentity::from_path(&task[..split]),
            task[split..].to_string(),
        ),
    };
    graph
        .locate_task(&TaskIdentifier::by_path(build, path))
        .unwrap()
        .queue_for_execution()
        .unwrap();
}

/// Runs everything queued and returns the failure messages in reported
/// order.
pub fn run(graph: &BuildTreeWorkGraph) -> Vec<String> {
    let mut failures = Vec::new();
    graph
        .run_scheduled_tasks(|failure| failures.push(format!("{failure:#}")))
        .unwrap();
    failures
}
