mod common;

use std::thread;
use std::time::{Duration, Instant};

use buildtree_core::api::{
    BuildIdentity, CoordinatorError, ScriptedBuild, ScriptedEngineFactory, ScriptedTask,
    TaskGraphState, TaskHandle, TaskIdentifier, TaskResourceState,
};
use pretty_assertions::assert_eq;

use common::{config, request, run, services, services_with_config};

fn two_builds() -> ScriptedEngineFactory {
    ScriptedEngineFactory::new()
        .with_build(":b", ScriptedBuild::new().task(":check", ScriptedTask::new()))
        .with_build(":c", ScriptedBuild::new().task(":build", ScriptedTask::new()))
}

fn check_task() -> TaskIdentifier {
    TaskIdentifier::by_path(BuildIdentity::included("b"), ":check")
}

#[test]
fn test_operations_in_wrong_state_are_rejected() {
    let services = services(two_builds(), &["b", "c"]);
    let graph = services.work_graph();

    let err = graph.start_task_execution().unwrap_err();
    assert!(err.is_programming_error(), "{err}");
    let err = graph.await_task_completion(|_| {}).unwrap_err();
    assert!(err.is_programming_error(), "{err}");
    assert_eq!(graph.state(), TaskGraphState::QueuingTasks);

    request(graph, ":b:check");
    graph.populate_task_graphs().unwrap();
    assert_eq!(graph.state(), TaskGraphState::ReadyToRun);
    let err = graph.with_nested_task_graph(|_| ()).unwrap_err();
    assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");

    graph.start_task_execution().unwrap();
    let err = graph.populate_task_graphs().unwrap_err();
    assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");

    graph.await_task_completion(|_| {}).unwrap();
    assert_eq!(graph.state(), TaskGraphState::Finished);
    let err = graph.locate_task(&check_task()).unwrap_err();
    assert!(matches!(err, CoordinatorError::IllegalState(_)), "{err}");
}

#[test]
fn test_tasks_may_be_located_again_when_ready() {
    let services = services(two_builds(), &["b", "c"]);
    let graph = services.work_graph();
    graph.populate_task_graphs().unwrap();
    assert_eq!(graph.state(), TaskGraphState::ReadyToRun);

    let resource = graph.locate_task(&check_task()).unwrap();
    assert_eq!(graph.state(), TaskGraphState::QueuingTasks);
    assert_eq!(resource.task().identity_path(), ":b:check");
    assert_eq!(resource.task_state(), TaskResourceState::Waiting);
}

#[test]
fn test_nested_task_graph_runs_separately() {
    let engines = two_builds();
    let log = engines.log();
    let services = services(engines, &["b", "c"]);
    let graph = services.work_graph();
    request(graph, ":b:check");

    let nested_failures = graph
        .with_nested_task_graph(|nested| {
            request(nested, ":c:build");
            run(nested)
        })
        .unwrap();

    assert!(nested_failures.is_empty());
    let executed = || -> Vec<String> {
        log.executed().iter().map(TaskHandle::identity_path).collect()
    };
    assert_eq!(executed(), vec![":c:build"]);
    assert_eq!(graph.state(), TaskGraphState::QueuingTasks);

    assert!(run(graph).is_empty());
    assert_eq!(executed(), vec![":c:build", ":b:check"]);
}

#[test]
fn test_other_thread_is_rejected_while_owner_is_busy() {
    let services = services(two_builds(), &["b", "c"]);
    let graph = services.work_graph();

    let from_other_thread = graph
        .with_nested_task_graph(|nested| {
            thread::scope(|scope| {
                scope
                    .spawn(|| nested.locate_task(&check_task()).map(|_| ()))
                    .join()
                    .unwrap()
            })
        })
        .unwrap();

    match from_other_thread {
        Err(CoordinatorError::ConcurrentUse { operation, .. }) => {
            assert_eq!(operation, "locate_task")
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Ownership is released once the owner's call returns.
    let later = thread::scope(|scope| {
        scope
            .spawn(|| graph.locate_task(&check_task()).map(|_| ()))
            .join()
            .unwrap()
    });
    assert!(later.is_ok());
}

#[test]
fn test_slow_builds_on_a_single_worker_are_healthy() {
    let engines = ScriptedEngineFactory::new()
        .with_build(":a", ScriptedBuild::new().task(":t", ScriptedTask::new().duration_ms(400)))
        .with_build(":b", ScriptedBuild::new().task(":t", ScriptedTask::new().duration_ms(400)));
    let services = services_with_config(config(1), engines, &["a", "b"]);
    let graph = services.work_graph();

    request(graph, ":a:t");
    request(graph, ":b:t");
    let started = Instant::now();
    let failures = run(graph);

    assert!(failures.is_empty(), "{failures:?}");
    // One worker runs the builds one after the other.
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(
        graph.task_states(),
        vec![
            (TaskHandle::new(BuildIdentity::included("a"), ":t"), TaskResourceState::Success),
            (TaskHandle::new(BuildIdentity::included("b"), ":t"), TaskResourceState::Success),
        ]
    );
}

#[test]
fn test_builds_waiting_on_each_other_are_reported_unhealthy() {
    let engines = ScriptedEngineFactory::new()
        .with_build(
            ":a",
            ScriptedBuild::new().task(":x", ScriptedTask::new().depends_on_build(":b", ":y")),
        )
        .with_build(
            ":b",
            ScriptedBuild::new().task(":y", ScriptedTask::new().depends_on_build(":a", ":x")),
        );
    let services = services(engines, &["a", "b"]);
    let graph = services.work_graph();

    request(graph, ":a:x");
    let started = Instant::now();
    let mut failures = Vec::new();
    graph.run_scheduled_tasks(|failure| failures.push(failure)).unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(failures.len(), 1);
    match failures[0].downcast_ref::<CoordinatorError>() {
        Some(CoordinatorError::Unhealthy { diagnostics }) => {
            assert!(diagnostics.contains("build :a on thread"), "{diagnostics}");
            assert!(
                diagnostics.contains("builds wait for each other: :b -> :a -> :b"),
                "{diagnostics}"
            );
        }
        other => panic!("unexpected failure: {other:?}"),
    }

    // The waits were failed so both builds could finish.
    assert_eq!(
        graph.task_states(),
        vec![
            (TaskHandle::new(BuildIdentity::included("a"), ":x"), TaskResourceState::Failed),
            (TaskHandle::new(BuildIdentity::included("b"), ":y"), TaskResourceState::Failed),
        ]
    );
    assert_eq!(graph.state(), TaskGraphState::Finished);
    assert!(services.close().is_success());
}
