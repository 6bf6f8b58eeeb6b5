//! Change events published after each committed write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NodeRun, NodeRunId, NodeRunState, Run, RunId, RunState};

/// Snapshot of a NodeRun after a committed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunEvent {
    pub kind: NodeRunEventKind,
    pub node_run_id: NodeRunId,
    pub state: NodeRunState,
    pub version: u64,
    pub node_run: NodeRun,
    pub timestamp: DateTime<Utc>,
}

impl NodeRunEvent {
    pub fn new(kind: NodeRunEventKind, node_run: &NodeRun) -> Self {
        Self {
            kind,
            node_run_id: node_run.node_run_id.clone(),
            state: node_run.state,
            version: node_run.version,
            node_run: node_run.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this is the last state change the NodeRun will see
    pub fn is_final(&self) -> bool {
        self.state.is_terminal() && self.kind != NodeRunEventKind::Evaluated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunEventKind {
    /// Current state sent when a stream opens
    Snapshot,
    Created,
    Dispatched,
    Requeued,
    Completed,
    Failed,
    Evaluated,
    Cancelled,
}

/// Run-level state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub state: RunState,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            state: run.state,
            timestamp: Utc::now(),
        }
    }
}

/// Everything the event hub carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    NodeRun(NodeRunEvent),
    Run(RunEvent),
}

impl CoordinatorEvent {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            CoordinatorEvent::NodeRun(_) => "node_run",
            CoordinatorEvent::Run(_) => "run",
        }
    }
}
