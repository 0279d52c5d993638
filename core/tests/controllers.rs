use std::sync::Arc;
use std::time::Duration;

use buildtree_core::api::{
    BuildDefinition, BuildIdentity, CoordinatorError, ExecutionConfig, ExecutionResult,
    RootBuildDefinition, ScriptedBuild, ScriptedEngineFactory, ScriptedTask, TaskHandle,
    TaskIdentifier,
};
use buildtree_core::controller::{BuildControllers, ControllerSetFactory};
use buildtree_core::engine::TaskLocator;
use buildtree_core::executor::BuildExecutor;
use buildtree_core::lease::WorkerLeaseService;
use buildtree_core::registry::{BuildRegistry, DefaultBuildRegistry};
use buildtree_core::state::ControllerState;
use pretty_assertions::assert_eq;

fn controllers(engines: ScriptedEngineFactory, included: &[&str]) -> Arc<BuildControllers> {
    let registry = DefaultBuildRegistry::new(Arc::new(engines));
    registry
        .add_root_build(RootBuildDefinition::new("/work/app", "app"))
        .unwrap();
    for name in included {
        registry
            .add_included_build(
                BuildDefinition::new(format!("/work/{name}")),
                &BuildIdentity::root(),
            )
            .unwrap();
    }
    let executor = BuildExecutor::new(&ExecutionConfig::default()).unwrap();
    ControllerSetFactory::new(
        Arc::new(registry),
        Arc::new(executor),
        Arc::new(WorkerLeaseService::new(4)),
        Duration::from_millis(10),
    )
    .create()
}

fn queue(controllers: &BuildControllers, build: &str, path: &str) {
    controllers
        .locate_task(&TaskIdentifier::by_path(BuildIdentity::from_path(build), path))
        .unwrap()
        .queue_for_execution()
        .unwrap();
}

fn chain() -> ScriptedEngineFactory {
    ScriptedEngineFactory::new()
        .with_build(
            ":a",
            ScriptedBuild::new().task(":app", ScriptedTask::new().depends_on_build(":b", ":lib")),
        )
        .with_build(
            ":b",
            ScriptedBuild::new().task(":lib", ScriptedTask::new().depends_on_build(":c", ":core")),
        )
        .with_build(":c", ScriptedBuild::new().task(":core", ScriptedTask::new()))
}

#[test]
fn test_population_reaches_fixpoint_before_finalizing() {
    let controllers = controllers(chain(), &["a", "b", "c"]);
    queue(&controllers, ":a", ":app");
    assert_eq!(controllers.controllers().len(), 1);

    controllers.populate_work_graphs().unwrap();

    let states: Vec<(String, ControllerState, Vec<TaskHandle>)> = controllers
        .controllers()
        .iter()
        .map(|c| (c.identity().path().to_string(), c.state(), c.scheduled_tasks()))
        .collect();
    let task = |build: &str, path: &str| TaskHandle::new(BuildIdentity::from_path(build), path);
    assert_eq!(
        states,
        vec![
            (":a".to_string(), ControllerState::ReadyToRun, vec![task(":a", ":app")]),
            (":b".to_string(), ControllerState::ReadyToRun, vec![task(":b", ":lib")]),
            (":c".to_string(), ControllerState::ReadyToRun, vec![task(":c", ":core")]),
        ]
    );

    for controller in controllers.controllers() {
        let err = controller.finalize_work_graph().unwrap_err();
        assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");
    }
}

#[test]
fn test_execute_runs_every_build() {
    let engines = chain();
    let log = engines.log();
    let controllers = controllers(engines, &["a", "b", "c"]);
    queue(&controllers, ":a", ":app");
    controllers.populate_work_graphs().unwrap();

    let result = controllers.execute();

    assert!(result.is_success());
    let executed: Vec<String> = log.executed().iter().map(TaskHandle::identity_path).collect();
    assert_eq!(executed, vec![":c:core", ":b:lib", ":a:app"]);
    for controller in controllers.controllers() {
        assert_eq!(controller.state(), ControllerState::Finished);
    }
    assert!(controllers.close().is_success());
}

#[test]
fn test_queue_after_finalize_is_rejected() {
    let engines = ScriptedEngineFactory::new().with_build(
        ":b",
        ScriptedBuild::new()
            .task(":check", ScriptedTask::new())
            .task(":test", ScriptedTask::new()),
    );
    let controllers = controllers(engines, &["b"]);
    queue(&controllers, ":b", ":check");
    controllers.populate_work_graphs().unwrap();

    let late = controllers
        .locate_task(&TaskIdentifier::by_path(BuildIdentity::included("b"), ":test"))
        .unwrap();
    let err = late.queue_for_execution().unwrap_err();
    assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");
}

#[test]
fn test_start_before_finalize_is_rejected() {
    let engines = ScriptedEngineFactory::new()
        .with_build(":b", ScriptedBuild::new().task(":check", ScriptedTask::new()));
    let controllers = controllers(engines, &["b"]);
    queue(&controllers, ":b", ":check");

    let controller = controllers
        .get_build_controller(&BuildIdentity::included("b"))
        .unwrap();
    let executor = BuildExecutor::new(&ExecutionConfig::default()).unwrap();
    let leases = Arc::new(WorkerLeaseService::new(1));
    let err = controller
        .start_execution(&executor, &leases, Box::new(|_: ExecutionResult<()>| {}))
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");
    assert_eq!(controller.state(), ControllerState::DiscoveringTasks);
}

#[test]
fn test_failed_finalize_poisons_controller() {
    let engines = ScriptedEngineFactory::new().with_build(
        ":b",
        ScriptedBuild::new()
            .task(":x", ScriptedTask::new().depends_on(":y"))
            .task(":y", ScriptedTask::new().depends_on(":x")),
    );
    let controllers = controllers(engines, &["b"]);
    queue(&controllers, ":b", ":x");
    let err = controllers.populate_work_graphs().unwrap_err();
    assert!(matches!(err, CoordinatorError::CircularDependency { .. }));

    let controller = controllers
        .get_build_controller(&BuildIdentity::included("b"))
        .unwrap();
    let executor = BuildExecutor::new(&ExecutionConfig::default()).unwrap();
    let leases = Arc::new(WorkerLeaseService::new(1));
    let err = controller
        .start_execution(&executor, &leases, Box::new(|_: ExecutionResult<()>| {}))
        .unwrap_err();
    match err {
        CoordinatorError::Poisoned { name, cause } => {
            assert_eq!(name, "build ':b'");
            assert!(cause.starts_with("Circular dependency"), "{cause}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_queueing_is_deduplicated() {
    let engines = ScriptedEngineFactory::new()
        .with_build(":b", ScriptedBuild::new().task(":check", ScriptedTask::new()));
    let controllers = controllers(engines, &["b"]);
    queue(&controllers, ":b", ":check");
    queue(&controllers, ":b", "check");
    controllers.populate_work_graphs().unwrap();

    let controller = controllers
        .get_build_controller(&BuildIdentity::included("b"))
        .unwrap();
    assert_eq!(controller.scheduled_tasks().len(), 1);
}

#[test]
fn test_await_without_start_fails() {
    let controllers = controllers(ScriptedEngineFactory::new(), &[]);
    let result = controllers.await_completion();
    let failures = result.into_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].downcast_ref::<CoordinatorError>(),
        Some(CoordinatorError::IllegalState(_))
    ));
}

#[test]
fn test_located_handle_must_name_an_existing_task() {
    let engines = ScriptedEngineFactory::new()
        .with_build(":b", ScriptedBuild::new().task(":check", ScriptedTask::new()));
    let controllers = controllers(engines, &["b"]);
    let b = BuildIdentity::included("b");

    let found = controllers
        .locate_task(&TaskIdentifier::of(TaskHandle::new(b.clone(), ":check")))
        .unwrap();
    assert_eq!(found.task(), &TaskHandle::new(b.clone(), ":check"));

    let err = controllers
        .locate_task(&TaskIdentifier::of(TaskHandle::new(b.clone(), ":missing")))
        .unwrap_err();
    match err {
        CoordinatorError::TaskNotFound { build, path } => {
            assert_eq!(build, b);
            assert_eq!(path, ":missing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
