//! NodeRun types: the record, its spec, and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EvaluationResult, NodeRunId, RunId};

/// JSON object carried as NodeRun inputs and outputs
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A NodeRun is a single schedulable unit of execution.
///
/// Records are immutable snapshots: every change produces a new snapshot with
/// `version` incremented by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRun {
    /// Unique identifier
    pub node_run_id: NodeRunId,

    /// Owning Run, if created within one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Parent NodeRun within the owning Run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_run_id: Option<NodeRunId>,

    /// Current lifecycle state
    pub state: NodeRunState,

    /// Description of the work; never mutated after creation
    pub spec: NodeRunSpec,

    /// Outputs reported on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<JsonMap>,

    /// Failure details reported with a `failed` completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeRunError>,

    /// Evaluation attached by a separate report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_result: Option<EvaluationResult>,

    /// Executor the NodeRun was dispatched to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorBinding>,

    /// Version token, incremented on every committed write
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl NodeRun {
    /// Create a fresh queued NodeRun with a generated identifier
    pub fn new(spec: NodeRunSpec) -> Self {
        let now = Utc::now();
        Self {
            node_run_id: NodeRunId::generate(),
            run_id: None,
            parent_node_run_id: None,
            state: NodeRunState::Queued,
            spec,
            outputs: None,
            error: None,
            evaluation_result: None,
            executor: None,
            version: 1,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    /// Attach the NodeRun to a Run and optional parent
    pub fn within_run(mut self, run_id: RunId, parent: Option<NodeRunId>) -> Self {
        self.run_id = Some(run_id);
        self.parent_node_run_id = parent;
        self
    }

    /// Check if the NodeRun is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// NodeRun lifecycle state
///
/// ```text
/// queued ──► running ──► succeeded | failed
///   │           │
///   └───────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl NodeRunState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeRunState::Succeeded | NodeRunState::Failed | NodeRunState::Cancelled
        )
    }

    /// Check whether a committed write may move a record from `self` to `next`.
    ///
    /// Rewriting the same state is allowed (field-only updates such as an
    /// evaluation report). `running -> queued` exists only so a failed
    /// dispatch can release its claim.
    pub fn can_transition_to(self, next: NodeRunState) -> bool {
        use NodeRunState::*;
        match (self, next) {
            (from, to) if from == to => true,
            (Queued, Running | Succeeded | Failed | Cancelled) => true,
            (Running, Queued | Succeeded | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NodeRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRunState::Queued => write!(f, "queued"),
            NodeRunState::Running => write!(f, "running"),
            NodeRunState::Succeeded => write!(f, "succeeded"),
            NodeRunState::Failed => write!(f, "failed"),
            NodeRunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Reference to a node type known to the Node Registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTypeRef {
    pub node_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl NodeTypeRef {
    pub fn new(node_type_id: impl Into<String>) -> Self {
        Self {
            node_type_id: node_type_id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl std::fmt::Display for NodeTypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.node_type_id, version),
            None => f.write_str(&self.node_type_id),
        }
    }
}

/// Executor family a NodeRun is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Executed directly by an Atomic Executor
    Atomic,
    /// Executed by a Composite Executor that decomposes it further
    Composite,
}

impl NodeKind {
    /// Naming convention fallback: `composite.*` node types are composite,
    /// everything else is atomic.
    pub fn from_node_type_id(node_type_id: &str) -> Self {
        if node_type_id.starts_with("composite.") {
            NodeKind::Composite
        } else {
            NodeKind::Atomic
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Atomic => write!(f, "atomic"),
            NodeKind::Composite => write!(f, "composite"),
        }
    }
}

/// Immutable description of the work a NodeRun performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunSpec {
    /// Node type to execute
    pub node_type_ref: NodeTypeRef,

    /// Input bindings
    #[serde(default)]
    pub inputs: JsonMap,

    /// Explicit executor family; resolved at dispatch when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,

    /// Opaque protocol extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl NodeRunSpec {
    /// Create a spec for the given node type with no inputs
    pub fn new(node_type_id: impl Into<String>) -> Self {
        Self {
            node_type_ref: NodeTypeRef::new(node_type_id),
            inputs: JsonMap::new(),
            kind: None,
            extensions: None,
        }
    }

    /// Set inputs from a JSON value; non-object values are ignored
    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = inputs {
            self.inputs = map;
        }
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.node_type_ref.version = Some(version.into());
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_extensions(mut self, extensions: serde_json::Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.node_type_ref.node_type_id.trim().is_empty() {
            return Err("node_type_ref.node_type_id cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Error details attached to a failed NodeRun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl NodeRunError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Executor a NodeRun was bound to at dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorBinding {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_run_is_queued() {
        let node_run = NodeRun::new(NodeRunSpec::new("atomic.echo"));
        assert_eq!(node_run.state, NodeRunState::Queued);
        assert_eq!(node_run.version, 1);
        assert!(node_run.outputs.is_none());
        assert!(node_run.evaluation_result.is_none());
        assert!(!node_run.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeRunState::Succeeded.is_terminal());
        assert!(NodeRunState::Failed.is_terminal());
        assert!(NodeRunState::Cancelled.is_terminal());
        assert!(!NodeRunState::Queued.is_terminal());
        assert!(!NodeRunState::Running.is_terminal());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        use NodeRunState::*;
        for terminal in [Succeeded, Failed, Cancelled] {
            for next in [Queued, Running, Succeeded, Failed, Cancelled] {
                if next != terminal {
                    assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
                }
            }
        }
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Queued));
    }

    #[test]
    fn test_kind_naming_convention() {
        assert_eq!(NodeKind::from_node_type_id("composite.plan"), NodeKind::Composite);
        assert_eq!(NodeKind::from_node_type_id("atomic.echo"), NodeKind::Atomic);
        assert_eq!(NodeKind::from_node_type_id("add"), NodeKind::Atomic);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&NodeRunState::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_spec_defaults_inputs() {
        let spec: NodeRunSpec =
            serde_json::from_str(r#"{"node_type_ref":{"node_type_id":"add"}}"#).unwrap();
        assert!(spec.inputs.is_empty());
        assert!(spec.kind.is_none());
        assert!(spec.validate().is_ok());
        assert!(NodeRunSpec::new("  ").validate().is_err());
    }
}
