//! End-to-End Scenario Tests
//!
//! Exercises the coordinator facade through full NodeRun and Run
//! lifecycles, including racing reporters.

use arp_workspace::types::{
    CoordinatorEvent, JsonMap, NodeRunEventKind, NodeRunSpec, NodeRunState, NodeRunsCreateRequest,
    RunStartRequest, RunState,
};
use arp_workspace::{CoordinatorError, RunCoordinator};
use serde_json::json;

fn outputs(result: i64) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert("result".into(), json!(result));
    map
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_have_one_winner() {
    let coordinator = RunCoordinator::default();
    let id = coordinator
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();

    let mut handles = Vec::new();
    for n in 0..16 {
        let coordinator = coordinator.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            coordinator.complete_node_run(&id, outputs(n)).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(node_run) => winners.push(node_run),
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = coordinator.get_node_run(&id).await.unwrap();
    assert_eq!(stored.state, NodeRunState::Succeeded);
    assert_eq!(stored.version, 2);
    assert_eq!(stored.outputs, winners[0].outputs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pairwise_completion_race_loser_conflicts() {
    for _ in 0..100 {
        let coordinator = RunCoordinator::default();
        let id = coordinator
            .create_node_runs(vec![NodeRunSpec::new("add")])
            .await
            .unwrap()[0]
            .node_run_id
            .clone();

        let first = {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tokio::spawn(async move { coordinator.complete_node_run(&id, outputs(1)).await })
        };
        let second = {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tokio::spawn(async move { coordinator.complete_node_run(&id, outputs(2)).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in &results {
            if let Err(err) = result {
                assert!(err.is_conflict(), "loser must see a conflict, got {err:?}");
            }
        }

        let stored = coordinator.get_node_run(&id).await.unwrap();
        assert_eq!(stored.outputs, winners[0].outputs);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_completion_leaves_one_terminal_state() {
    for _ in 0..20 {
        let coordinator = RunCoordinator::default();
        let id = coordinator
            .create_node_runs(vec![NodeRunSpec::new("add")])
            .await
            .unwrap()[0]
            .node_run_id
            .clone();

        let complete = {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tokio::spawn(async move { coordinator.complete_node_run(&id, outputs(3)).await })
        };
        let cancel = {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tokio::spawn(async move { coordinator.cancel_node_run(&id).await })
        };

        let completed = complete.await.unwrap();
        let cancelled = cancel.await.unwrap();
        assert!(
            completed.is_ok() != cancelled.is_ok(),
            "exactly one terminal write must win"
        );

        let stored = coordinator.get_node_run(&id).await.unwrap();
        if completed.is_ok() {
            assert_eq!(stored.state, NodeRunState::Succeeded);
        } else {
            assert_eq!(stored.state, NodeRunState::Cancelled);
            assert!(stored.outputs.is_none());
        }
    }
}

#[tokio::test]
async fn test_events_follow_commit_order() {
    let coordinator = RunCoordinator::default();
    let mut events = coordinator.subscribe();

    let id = coordinator
        .create_node_runs(vec![NodeRunSpec::new("add")])
        .await
        .unwrap()[0]
        .node_run_id
        .clone();
    coordinator.complete_node_run(&id, outputs(3)).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(CoordinatorEvent::NodeRun(event)) = events.try_recv() {
        seen.push((event.kind, event.version));
    }
    assert_eq!(
        seen,
        vec![(NodeRunEventKind::Created, 1), (NodeRunEventKind::Completed, 2)]
    );
}

#[tokio::test]
async fn test_run_scopes_children() {
    let coordinator = RunCoordinator::default();
    let started = coordinator
        .start_run(
            RunStartRequest::new(NodeRunSpec::new("composite.plan"))
                .with_context(json!({"tenant": "acme"})),
        )
        .await
        .unwrap();
    let run_id = started.run.run_id.clone();
    let root = started.root_node_run.node_run_id.clone();

    let children = coordinator
        .create_node_runs_in(
            NodeRunsCreateRequest::new(vec![NodeRunSpec::new("add")])
                .in_run(run_id.clone())
                .with_parent(root.clone()),
        )
        .await
        .unwrap();
    assert_eq!(children[0].run_id.as_ref(), Some(&run_id));
    assert_eq!(children[0].parent_node_run_id.as_ref(), Some(&root));

    // A parent needs a run to belong to
    let err = coordinator
        .create_node_runs_in(
            NodeRunsCreateRequest::new(vec![NodeRunSpec::new("add")]).with_parent(root.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidRequest { .. }));

    let cancelled = coordinator.cancel_run(&run_id).unwrap();
    assert_eq!(cancelled.state, RunState::Cancelled);
    assert!(cancelled.ended_at.is_some());

    // Cancelling a Run does not touch its NodeRuns
    let child = coordinator
        .get_node_run(&children[0].node_run_id)
        .await
        .unwrap();
    assert_eq!(child.state, NodeRunState::Queued);
}

#[tokio::test]
async fn test_node_runs_in_unknown_run_are_rejected() {
    let coordinator = RunCoordinator::default();
    let err = coordinator
        .create_node_runs_in(
            NodeRunsCreateRequest::new(vec![NodeRunSpec::new("add")])
                .in_run(arp_workspace::types::RunId::parse("run_missing").unwrap()),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(coordinator.node_run_count().await, 0);
}
