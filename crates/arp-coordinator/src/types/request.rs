//! Request and response bodies of the coordinator API.

use serde::{Deserialize, Serialize};

use super::{EvaluationResult, JsonMap, NodeRun, NodeRunError, NodeRunId, NodeRunSpec, RunId};

/// Request to create NodeRuns, optionally inside a Run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunsCreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Parent of every created NodeRun; requires `run_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_run_id: Option<NodeRunId>,

    pub node_runs: Vec<NodeRunSpec>,
}

impl NodeRunsCreateRequest {
    pub fn new(node_runs: Vec<NodeRunSpec>) -> Self {
        Self {
            run_id: None,
            parent_node_run_id: None,
            node_runs,
        }
    }

    pub fn in_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_parent(mut self, parent: NodeRunId) -> Self {
        self.parent_node_run_id = Some(parent);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunsCreateResponse {
    pub node_runs: Vec<NodeRun>,
}

/// Terminal state reported by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Succeeded,
    Failed,
}

/// Completion report body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunCompleteRequest {
    pub state: TerminalState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<JsonMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeRunError>,
}

impl NodeRunCompleteRequest {
    pub fn succeeded(outputs: JsonMap) -> Self {
        Self {
            state: TerminalState::Succeeded,
            outputs: Some(outputs),
            error: None,
        }
    }

    pub fn failed(error: NodeRunError) -> Self {
        Self {
            state: TerminalState::Failed,
            outputs: None,
            error: Some(error),
        }
    }
}

/// Evaluation report body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunEvaluationReport {
    pub evaluation_result: EvaluationResult,
}

/// Liveness probe response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    pub time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

/// Service version response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub service_name: String,
    pub service_version: String,
    pub supported_api_versions: Vec<String>,
}
