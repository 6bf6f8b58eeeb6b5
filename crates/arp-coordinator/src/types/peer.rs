//! Bodies exchanged with peer services.
//!
//! These cover only the calls the coordinator makes; the peers' full APIs
//! are their own concern.

use serde::{Deserialize, Serialize};

use super::{JsonMap, NodeKind, NodeRunError, NodeRunId, NodeRunSpec, NodeTypeRef, RunId};

/// Request sent to an Atomic Executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicExecuteRequest {
    pub node_run_id: NodeRunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub node_type_ref: NodeTypeRef,
    pub inputs: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// Request sent to a Composite Executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBeginRequest {
    pub node_run_id: NodeRunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub node_type_ref: NodeTypeRef,
    pub inputs: JsonMap,
    /// Candidates chosen by the Selection service, if consulted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_set: Option<CandidateSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// Executor acknowledgement of a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchAck {
    /// Work started; completion will be reported later
    Accepted,
    /// Work finished synchronously
    Succeeded {
        #[serde(default)]
        outputs: JsonMap,
    },
    /// Work failed synchronously
    Failed { error: NodeRunError },
}

/// Request for a bounded candidate set for a composite NodeRun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSetRequest {
    pub node_run_id: NodeRunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub node_type_ref: NodeTypeRef,
    pub inputs: JsonMap,
}

/// Ranked node types proposed by the Selection service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub candidate_set_id: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub node_type_ref: NodeTypeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Node type metadata from the Node Registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    pub node_type_ref: NodeTypeRef,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Authorization question put to the Policy Decision Point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecisionRequest {
    pub action: String,
    pub node_run_id: NodeRunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub node_type_ref: NodeTypeRef,
}

impl PolicyDecisionRequest {
    /// Action name used when authorizing a dispatch
    pub const DISPATCH: &'static str = "node_run.dispatch";

    pub(crate) fn dispatch(
        node_run_id: &NodeRunId,
        run_id: Option<&RunId>,
        spec: &NodeRunSpec,
    ) -> Self {
        Self {
            action: Self::DISPATCH.to_string(),
            node_run_id: node_run_id.clone(),
            run_id: run_id.cloned(),
            node_type_ref: spec.node_type_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}
