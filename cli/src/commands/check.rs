use std::sync::Arc;

use buildtree_core::api::{BuildTreeServices, CompositeConfig};
use tracing::warn;

use crate::commands::cli::CheckArgs;
use crate::error::CliError;
use crate::output::Reporter;
use crate::scenario::Scenario;

/// Registers the scenario's builds and populates every work graph, which
/// surfaces name collisions, plugin build cycles and task cycles without
/// running any task.
#[tracing::instrument(name = "cli.check", skip(args, cfg), fields(scenario = %args.scenario.display()))]
pub fn check(args: CheckArgs, cfg: CompositeConfig) -> Result<i32, CliError> {
    let scenario = Scenario::load(&args.scenario)?;
    let reporter = Reporter::new(args.format);
    reporter.run_start("check", &args.scenario.display().to_string());

    let services = BuildTreeServices::new(cfg, Arc::new(scenario.engines()))?;
    let result = populate(&scenario, &services, &reporter);

    let closed = services.close();
    for failure in closed.failures() {
        warn!(error = %failure, "failed to stop build tree");
    }

    result?;
    reporter.run_end(0, 0);
    Ok(0)
}

fn populate(
    scenario: &Scenario,
    services: &BuildTreeServices,
    reporter: &Reporter,
) -> Result<(), CliError> {
    for build in scenario.register(services.registry().as_ref())? {
        reporter.build_registered(&build);
    }

    let graph = services.work_graph();
    for request in scenario.requests() {
        graph.locate_task(&request)?.queue_for_execution()?;
    }
    graph.populate_task_graphs()?;

    for (task, _) in graph.task_states() {
        reporter.task_scheduled(&task);
    }
    Ok(())
}
