//! Wires the coordinator together for one build tree.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::CompositeConfig;
use crate::controller::ControllerSetFactory;
use crate::engine::BuildEngineFactory;
use crate::error::CoordinatorError;
use crate::executor::{BuildExecutor, ExecutionResult};
use crate::facade::BuildTreeWorkGraph;
use crate::lease::WorkerLeaseService;
use crate::registry::{AcyclicBuildRegistry, BuildRegistry, DefaultBuildRegistry};

/// Shared services of a build tree: the registry, the worker leases, the
/// executor and the tree's task graph.
pub struct BuildTreeServices {
    config: CompositeConfig,
    registry: Arc<dyn BuildRegistry>,
    leases: Arc<WorkerLeaseService>,
    executor: Arc<BuildExecutor>,
    work_graph: BuildTreeWorkGraph,
}

impl BuildTreeServices {
    pub fn new(
        config: CompositeConfig,
        engines: Arc<dyn BuildEngineFactory>,
    ) -> Result<Self, CoordinatorError> {
        let execution = &config.execution;
        let executor = Arc::new(BuildExecutor::new(execution)?);
        let leases = Arc::new(
            WorkerLeaseService::new(execution.max_workers).with_unit_capacity(execution.pool_threads),
        );

        let registry: Arc<dyn BuildRegistry> = if config.isolated_projects {
            Arc::new(AcyclicBuildRegistry::new(DefaultBuildRegistry::new(engines)))
        } else {
            Arc::new(DefaultBuildRegistry::new(engines))
        };

        let factory = ControllerSetFactory::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            Arc::clone(&leases),
            Duration::from_millis(execution.poll_interval_ms.max(1)),
        );
        info!(
            max_workers = leases.max_workers(),
            isolated_projects = config.isolated_projects,
            "build tree services ready"
        );

        Ok(Self {
            config,
            registry,
            leases,
            executor,
            work_graph: BuildTreeWorkGraph::new(factory),
        })
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn BuildRegistry> {
        &self.registry
    }

    pub fn leases(&self) -> &Arc<WorkerLeaseService> {
        &self.leases
    }

    pub fn work_graph(&self) -> &BuildTreeWorkGraph {
        &self.work_graph
    }

    /// Stops the task graph, every build and the executor. All failures are
    /// collected; later steps still run when an earlier one fails.
    pub fn close(&self) -> ExecutionResult<()> {
        let result = self
            .work_graph
            .close()
            .with_failures(self.registry.stop_all());
        self.executor.shutdown();
        result
    }
}
