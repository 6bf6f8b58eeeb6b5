//! Run types.
//!
//! A Run groups NodeRuns under a single root. Only the root and direct
//! parent links are tracked; hierarchy derivation lives elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NodeRunId, NodeRunSpec, RunId};

/// A Run and its root NodeRun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub state: RunState,
    pub root_node_run_id: NodeRunId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_context: Option<serde_json::Value>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl Run {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request to start a Run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStartRequest {
    /// Caller-chosen identifier; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Spec of the root NodeRun
    pub root: NodeRunSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_context: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl RunStartRequest {
    pub fn new(root: NodeRunSpec) -> Self {
        Self {
            run_id: None,
            root,
            run_context: None,
            extensions: None,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_context(mut self, run_context: serde_json::Value) -> Self {
        self.run_context = Some(run_context);
        self
    }
}

/// Response to a start-run request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStartResponse {
    pub run: Run,
    pub root_node_run: super::NodeRun,
}
