use std::sync::Arc;

use buildtree_core::api::{BuildTreeServices, CompositeConfig};
use tracing::{info, warn};

use crate::commands::cli::RunArgs;
use crate::error::CliError;
use crate::output::Reporter;
use crate::scenario::Scenario;

/// Runs the scenario's requested tasks. Returns 0 when every task
/// succeeded and 1 when any build failed.
#[tracing::instrument(name = "cli.run", skip(args, cfg), fields(scenario = %args.scenario.display()))]
pub fn run(args: RunArgs, cfg: CompositeConfig) -> Result<i32, CliError> {
    let scenario = Scenario::load(&args.scenario)?;
    let reporter = Reporter::new(args.format);
    reporter.run_start("run", &args.scenario.display().to_string());

    let services = BuildTreeServices::new(cfg, Arc::new(scenario.engines()))?;
    let result = execute(&scenario, &services, &reporter);

    let closed = services.close();
    for failure in closed.failures() {
        warn!(error = %failure, "failed to stop build tree");
    }

    let failures = result?;
    let code = if failures == 0 { 0 } else { 1 };
    reporter.run_end(code, failures);
    Ok(code)
}

fn execute(
    scenario: &Scenario,
    services: &BuildTreeServices,
    reporter: &Reporter,
) -> Result<usize, CliError> {
    for build in scenario.register(services.registry().as_ref())? {
        reporter.build_registered(&build);
    }

    let graph = services.work_graph();
    for request in scenario.requests() {
        graph.locate_task(&request)?.queue_for_execution()?;
    }

    let mut failures = Vec::new();
    graph.run_scheduled_tasks(|failure| failures.push(failure))?;

    for (task, state) in graph.task_states() {
        reporter.task_end(&task, state);
    }
    for failure in &failures {
        reporter.failure(failure);
    }
    info!(run_id = reporter.run_id(), failures = failures.len(), "scenario finished");
    Ok(failures.len())
}
