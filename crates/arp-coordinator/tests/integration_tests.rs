//! Integration tests for the coordinator client and server
//!
//! Each test serves a fresh coordinator on an ephemeral port and drives it
//! through [`RunCoordinatorClient`].

#![cfg(all(feature = "client", feature = "server", feature = "testing"))]

use arp_coordinator::testing::RecordingAtomicExecutor;
use arp_coordinator::types::{
    CoordinatorEvent, EvaluationResult, HealthStatus, NodeRunCompleteRequest, NodeRunError,
    NodeRunEventKind, NodeRunId, NodeRunSpec, NodeRunState, NodeRunsCreateRequest, RunId,
    RunStartRequest, RunState,
};
use arp_coordinator::{CoordinatorError, CoordinatorServer, Peers, RunCoordinator, RunCoordinatorClient};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    client: RunCoordinatorClient,
    atomic: Arc<RecordingAtomicExecutor>,
}

async fn start_server() -> Harness {
    let atomic = Arc::new(RecordingAtomicExecutor::default());
    let coordinator = RunCoordinator::builder()
        .peers(Peers::new().with_atomic(atomic.clone()))
        .build();
    let router = CoordinatorServer::new(coordinator).router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = RunCoordinatorClient::new(format!("http://{addr}")).unwrap();
    Harness { client, atomic }
}

fn outputs(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("outputs must be an object"),
    }
}

// =============================================================================
// Service endpoints
// =============================================================================

#[tokio::test]
async fn test_health_and_version() {
    let harness = start_server().await;

    let health = harness.client.health().await.unwrap();
    assert_eq!(health.status, HealthStatus::Ok);

    let version = harness.client.version().await.unwrap();
    assert_eq!(version.service_name, "arp-run-coordinator");
    assert_eq!(version.supported_api_versions, vec!["v1".to_string()]);
}

// =============================================================================
// NodeRun lifecycle
// =============================================================================

#[tokio::test]
async fn test_add_node_run_lifecycle() {
    let harness = start_server().await;
    let client = &harness.client;

    let created = client
        .create_node_runs(vec![
            NodeRunSpec::new("add").with_inputs(json!({"a": 1, "b": 2})),
        ])
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let id = created[0].node_run_id.clone();
    assert_eq!(created[0].state, NodeRunState::Queued);
    assert_eq!(created[0].version, 1);

    let running = client.dispatch(&id).await.unwrap();
    assert_eq!(running.state, NodeRunState::Running);
    assert_eq!(harness.atomic.requests().len(), 1);

    let done = client
        .complete(
            &id,
            &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))),
        )
        .await
        .unwrap();
    assert_eq!(done.state, NodeRunState::Succeeded);
    assert_eq!(done.outputs.as_ref().unwrap()["result"], 3);

    let fetched = client.get_node_run(&id).await.unwrap();
    assert_eq!(fetched, done);
}

#[tokio::test]
async fn test_failure_report() {
    let harness = start_server().await;
    let client = &harness.client;
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();
    client.dispatch(&id).await.unwrap();

    let failed = client
        .complete(
            &id,
            &NodeRunCompleteRequest::failed(NodeRunError::new("bad_input", "missing b")),
        )
        .await
        .unwrap();

    assert_eq!(failed.state, NodeRunState::Failed);
    assert_eq!(failed.error.unwrap().code, "bad_input");
}

#[tokio::test]
async fn test_unknown_node_run_is_not_found() {
    let harness = start_server().await;

    let err = harness
        .client
        .get_node_run(&NodeRunId::parse("node_run_missing").unwrap())
        .await
        .unwrap_err();

    assert!(err.is_not_found(), "got {err:?}");
}

#[tokio::test]
async fn test_second_completion_is_rejected() {
    let harness = start_server().await;
    let client = &harness.client;
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();

    client
        .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))))
        .await
        .unwrap();

    // Identical replay is accepted without a new version
    let replay = client
        .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))))
        .await
        .unwrap();
    assert_eq!(replay.version, 2);

    let err = client
        .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 4}))))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
}

#[tokio::test]
async fn test_evaluation_after_completion() {
    let harness = start_server().await;
    let client = &harness.client;
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();
    client
        .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))))
        .await
        .unwrap();

    let evaluated = client
        .report_evaluation(&id, EvaluationResult::new("pass").with_score(1.0))
        .await
        .unwrap();

    assert_eq!(evaluated.state, NodeRunState::Succeeded);
    assert_eq!(evaluated.evaluation_result.unwrap().outcome, "pass");

    let err = client
        .report_evaluation(&id, EvaluationResult::new("fail"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
}

#[tokio::test]
async fn test_cancel_node_run() {
    let harness = start_server().await;
    let client = &harness.client;
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();
    client.dispatch(&id).await.unwrap();

    let cancelled = client.cancel(&id).await.unwrap();
    assert_eq!(cancelled.state, NodeRunState::Cancelled);
    assert_eq!(harness.atomic.cancelled(), vec![id.clone()]);

    let err = client.dispatch(&id).await.unwrap_err();
    assert!(err.is_invalid_state(), "got {err:?}");
}

#[tokio::test]
async fn test_empty_node_type_is_bad_request() {
    let harness = start_server().await;

    let err = harness
        .client
        .create_node_runs(vec![NodeRunSpec::new("")])
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::InvalidRequest { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_wait_for_node_run() {
    let harness = start_server().await;
    let client = harness.client.clone();
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();

    let completer = {
        let client = client.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client
                .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))))
                .await
                .unwrap();
        })
    };

    let done = client
        .wait_for_node_run(&id, Duration::from_millis(10), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(done.state, NodeRunState::Succeeded);
    completer.await.unwrap();
}

// =============================================================================
// Runs
// =============================================================================

#[tokio::test]
async fn test_run_with_children() {
    let harness = start_server().await;
    let client = &harness.client;

    let run_id = RunId::parse("run_integration").unwrap();
    let started = client
        .start_run(
            &RunStartRequest::new(NodeRunSpec::new("composite.plan"))
                .with_run_id(run_id.clone()),
        )
        .await
        .unwrap();
    assert_eq!(started.run.run_id, run_id);
    assert_eq!(started.run.state, RunState::Running);
    assert_eq!(started.root_node_run.run_id.as_ref(), Some(&run_id));

    let children = client
        .create_node_runs_in(
            &NodeRunsCreateRequest::new(vec![NodeRunSpec::new("add"), NodeRunSpec::new("add")])
                .in_run(run_id.clone())
                .with_parent(started.root_node_run.node_run_id.clone()),
        )
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.run_id.as_ref(), Some(&run_id));
        assert_eq!(
            child.parent_node_run_id.as_ref(),
            Some(&started.root_node_run.node_run_id)
        );
    }

    let err = client
        .start_run(&RunStartRequest::new(NodeRunSpec::new("add")).with_run_id(run_id.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "run_already_exists");

    let cancelled = client.cancel_run(&run_id).await.unwrap();
    assert_eq!(cancelled.state, RunState::Cancelled);
    assert_eq!(client.get_run(&run_id).await.unwrap().state, RunState::Cancelled);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let harness = start_server().await;

    let err = harness
        .client
        .get_run(&RunId::parse("run_missing").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
}

// =============================================================================
// Event streams
// =============================================================================

#[tokio::test]
async fn test_node_run_event_stream_follows_to_completion() {
    let harness = start_server().await;
    let client = harness.client.clone();
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();

    let mut stream = client.stream_node_run_events(&id).await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    match first {
        CoordinatorEvent::NodeRun(event) => {
            assert_eq!(event.kind, NodeRunEventKind::Snapshot);
            assert_eq!(event.state, NodeRunState::Queued);
        }
        other => panic!("expected NodeRun snapshot, got {other:?}"),
    }

    client.dispatch(&id).await.unwrap();
    client
        .complete(&id, &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    let collect = async {
        while let Some(event) = stream.next().await {
            if let CoordinatorEvent::NodeRun(event) = event.unwrap() {
                kinds.push(event.kind);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .unwrap();

    assert_eq!(
        kinds,
        vec![NodeRunEventKind::Dispatched, NodeRunEventKind::Completed]
    );
}

#[tokio::test]
async fn test_event_stream_of_terminal_node_run_ends_after_snapshot() {
    let harness = start_server().await;
    let client = &harness.client;
    let id = client
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();
    client.cancel(&id).await.unwrap();

    let mut stream = client.stream_node_run_events(&id).await.unwrap();
    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        events
    })
    .await
    .unwrap();

    assert_eq!(events.len(), 1);
    match &events[0] {
        CoordinatorEvent::NodeRun(event) => assert_eq!(event.state, NodeRunState::Cancelled),
        other => panic!("expected NodeRun snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_event_stream_outlives_child_completion() {
    let harness = start_server().await;
    let client = harness.client.clone();

    let run_id = RunId::parse("run_stream").unwrap();
    let started = client
        .start_run(
            &RunStartRequest::new(NodeRunSpec::new("composite.plan"))
                .with_run_id(run_id.clone()),
        )
        .await
        .unwrap();
    let child = client
        .create_node_runs_in(
            &NodeRunsCreateRequest::new(vec![NodeRunSpec::new("add")])
                .in_run(run_id.clone())
                .with_parent(started.root_node_run.node_run_id.clone()),
        )
        .await
        .unwrap()
        .remove(0);

    let mut stream = client.stream_run_events(&run_id).await.unwrap();
    match stream.next().await.unwrap().unwrap() {
        CoordinatorEvent::Run(event) => {
            assert_eq!(event.run_id, run_id);
            assert_eq!(event.state, RunState::Running);
        }
        other => panic!("expected Run snapshot, got {other:?}"),
    }

    client
        .complete(
            &child.node_run_id,
            &NodeRunCompleteRequest::succeeded(outputs(json!({"result": 3}))),
        )
        .await
        .unwrap();

    // The child's terminal event passes through without closing the stream
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match next {
        CoordinatorEvent::NodeRun(event) => {
            assert_eq!(event.node_run_id, child.node_run_id);
            assert_eq!(event.kind, NodeRunEventKind::Completed);
        }
        other => panic!("expected child completion, got {other:?}"),
    }

    client.cancel_run(&run_id).await.unwrap();

    let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        events
    })
    .await
    .unwrap();

    assert_eq!(rest.len(), 1, "stream ends on the Run's terminal event");
    match &rest[0] {
        CoordinatorEvent::Run(event) => assert_eq!(event.state, RunState::Cancelled),
        other => panic!("expected Run cancellation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_event_stream_of_cancelled_run_ends_after_snapshot() {
    let harness = start_server().await;
    let client = &harness.client;
    let run_id = RunId::parse("run_done").unwrap();
    client
        .start_run(&RunStartRequest::new(NodeRunSpec::new("add")).with_run_id(run_id.clone()))
        .await
        .unwrap();
    client.cancel_run(&run_id).await.unwrap();

    let mut stream = client.stream_run_events(&run_id).await.unwrap();
    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        events
    })
    .await
    .unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], CoordinatorEvent::Run(e) if e.state == RunState::Cancelled));
}
