//! Run Coordinator Core Types
//!
//! ## Module Structure
//!
//! - [`ids`] - NodeRun and Run identifiers
//! - `node_run` - NodeRun record, spec and lifecycle state
//! - `evaluation` - Evaluation results
//! - `run` - Run record and start request
//! - `request` - Inbound request/response bodies
//! - `peer` - Bodies exchanged with peer services
//! - `events` - Change events

pub mod ids;
mod evaluation;
mod events;
mod node_run;
mod peer;
mod request;
mod run;

pub use evaluation::EvaluationResult;
pub use events::{CoordinatorEvent, NodeRunEvent, NodeRunEventKind, RunEvent};
pub use ids::{IdError, NodeRunId, RunId};
pub use node_run::{
    ExecutorBinding, JsonMap, NodeKind, NodeRun, NodeRunError, NodeRunSpec, NodeRunState,
    NodeTypeRef,
};
pub use peer::{
    AtomicExecuteRequest, Candidate, CandidateSet, CandidateSetRequest, CompositeBeginRequest,
    Decision, DispatchAck, NodeTypeInfo, PolicyDecision, PolicyDecisionRequest,
};
pub use request::{
    Health, HealthStatus, NodeRunCompleteRequest, NodeRunEvaluationReport, NodeRunsCreateRequest,
    NodeRunsCreateResponse, TerminalState, VersionInfo,
};
pub use run::{Run, RunStartRequest, RunStartResponse, RunState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_run_round_trip() {
        let node_run = NodeRun::new(
            NodeRunSpec::new("add").with_inputs(serde_json::json!({"a": 1, "b": 2})),
        );
        let json = serde_json::to_string(&node_run).unwrap();
        let parsed: NodeRun = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node_run);
        assert!(!json.contains("outputs"));
        assert!(!json.contains("evaluation_result"));
    }

    #[test]
    fn test_complete_request_wire_format() {
        let request: NodeRunCompleteRequest =
            serde_json::from_str(r#"{"state":"succeeded","outputs":{"result":3}}"#).unwrap();
        assert_eq!(request.state, TerminalState::Succeeded);
        assert_eq!(request.outputs.unwrap()["result"], 3);
    }
}
