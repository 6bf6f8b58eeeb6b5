//! Evaluation/output recorder
//!
//! Folds completion, failure, cancellation and evaluation reports into the
//! store. Every write is a read-modify-CAS loop:
//!
//! - a completion or failure that meets another completion or failure
//!   (committed first, or winning the CAS) returns `Conflict`; losing to a
//!   non-terminal write (an evaluation report, a dispatch claim) re-reads
//!   and tries again
//! - writes against a cancelled NodeRun, and any second cancel, return
//!   `InvalidState`
//! - reports identical to what is stored return the current record unchanged
//! - evaluation reports never depend on state, so every conflict is retried

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::EventHub;
use crate::store::NodeRunStore;
use crate::types::{
    EvaluationResult, JsonMap, NodeRun, NodeRunError, NodeRunEventKind, NodeRunId, NodeRunState,
};

/// Default bound on CAS attempts per report
pub const DEFAULT_MAX_CAS_RETRIES: usize = 16;

/// A terminal write the recorder can apply
#[derive(Debug, Clone, PartialEq)]
enum TerminalWrite {
    Complete { outputs: JsonMap },
    Fail {
        error: NodeRunError,
        outputs: Option<JsonMap>,
    },
    Cancel,
}

impl TerminalWrite {
    fn operation(&self) -> &'static str {
        match self {
            TerminalWrite::Complete { .. } => "complete",
            TerminalWrite::Fail { .. } => "fail",
            TerminalWrite::Cancel => "cancel",
        }
    }

    fn target(&self) -> NodeRunState {
        match self {
            TerminalWrite::Complete { .. } => NodeRunState::Succeeded,
            TerminalWrite::Fail { .. } => NodeRunState::Failed,
            TerminalWrite::Cancel => NodeRunState::Cancelled,
        }
    }

    fn event(&self) -> NodeRunEventKind {
        match self {
            TerminalWrite::Complete { .. } => NodeRunEventKind::Completed,
            TerminalWrite::Fail { .. } => NodeRunEventKind::Failed,
            TerminalWrite::Cancel => NodeRunEventKind::Cancelled,
        }
    }

    /// Whether `current` already holds exactly this write
    fn is_replay_of(&self, current: &NodeRun) -> bool {
        match self {
            TerminalWrite::Complete { outputs } => {
                current.state == NodeRunState::Succeeded
                    && current.outputs.as_ref() == Some(outputs)
            }
            TerminalWrite::Fail { error, outputs } => {
                current.state == NodeRunState::Failed
                    && current.error.as_ref() == Some(error)
                    && current.outputs == *outputs
            }
            // Cancelling twice is an error, not a replay
            TerminalWrite::Cancel => false,
        }
    }

    /// Cancellation re-reads and reports `InvalidState` after losing a race
    fn conflicts_on_lost_race(&self) -> bool {
        !matches!(self, TerminalWrite::Cancel)
    }

    /// Whether `current` holds a competing completion or failure
    fn competes_with(&self, current: &NodeRun) -> bool {
        self.conflicts_on_lost_race()
            && matches!(current.state, NodeRunState::Succeeded | NodeRunState::Failed)
    }

    fn apply(&self, current: &NodeRun) -> NodeRun {
        let mut next = current.clone();
        next.state = self.target();
        next.ended_at = Some(Utc::now());
        match self {
            TerminalWrite::Complete { outputs } => next.outputs = Some(outputs.clone()),
            TerminalWrite::Fail { error, outputs } => {
                next.error = Some(error.clone());
                next.outputs = outputs.clone();
            }
            TerminalWrite::Cancel => {}
        }
        next
    }
}

/// Applies reports to NodeRuns through the store
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn NodeRunStore>,
    events: EventHub,
    max_retries: usize,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    pub fn new(store: Arc<dyn NodeRunStore>, events: EventHub) -> Self {
        Self {
            store,
            events,
            max_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Transition to `succeeded` with `outputs`
    pub async fn record_completion(
        &self,
        node_run_id: &NodeRunId,
        outputs: JsonMap,
    ) -> CoordinatorResult<NodeRun> {
        self.terminal_write(node_run_id, TerminalWrite::Complete { outputs })
            .await
    }

    /// Transition to `failed` with `error` and optional failure outputs
    pub async fn record_failure(
        &self,
        node_run_id: &NodeRunId,
        error: NodeRunError,
        outputs: Option<JsonMap>,
    ) -> CoordinatorResult<NodeRun> {
        self.terminal_write(node_run_id, TerminalWrite::Fail { error, outputs })
            .await
    }

    /// Transition to `cancelled`; fails `InvalidState` once terminal
    pub async fn record_cancellation(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.terminal_write(node_run_id, TerminalWrite::Cancel).await
    }

    /// Attach an evaluation result, in any state
    pub async fn record_evaluation(
        &self,
        node_run_id: &NodeRunId,
        result: EvaluationResult,
    ) -> CoordinatorResult<NodeRun> {
        for attempt in 1..=self.max_retries {
            let current = self.store.get(node_run_id).await?;

            match &current.evaluation_result {
                Some(existing) if *existing == result => {
                    debug!(node_run_id = %node_run_id, "Identical evaluation replayed");
                    return Ok(current);
                }
                Some(_) => {
                    warn!(node_run_id = %node_run_id, "Rejected differing evaluation report");
                    return Err(CoordinatorError::conflict(
                        node_run_id.as_str(),
                        "evaluation already recorded with a different payload",
                    ));
                }
                None => {}
            }

            let mut next = current.clone();
            next.evaluation_result = Some(result.clone());

            match self
                .store
                .compare_and_swap(node_run_id, current.version, next)
                .await
            {
                Ok(committed) => {
                    info!(
                        node_run_id = %node_run_id,
                        state = %committed.state,
                        version = committed.version,
                        "Recorded evaluation"
                    );
                    self.events.node_run(NodeRunEventKind::Evaluated, &committed);
                    return Ok(committed);
                }
                Err(err) if err.is_conflict() => {
                    debug!(node_run_id = %node_run_id, attempt, "Evaluation CAS conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(self.retries_exhausted(node_run_id, "report evaluation"))
    }

    async fn terminal_write(
        &self,
        node_run_id: &NodeRunId,
        write: TerminalWrite,
    ) -> CoordinatorResult<NodeRun> {
        let operation = write.operation();

        for attempt in 1..=self.max_retries {
            let current = self.store.get(node_run_id).await?;

            if write.is_replay_of(&current) {
                debug!(node_run_id = %node_run_id, operation, "Identical report replayed");
                return Ok(current);
            }
            if write.competes_with(&current) {
                warn!(
                    node_run_id = %node_run_id,
                    state = %current.state,
                    operation,
                    "Competing report for finished NodeRun"
                );
                return Err(CoordinatorError::conflict(
                    node_run_id.as_str(),
                    format!("NodeRun already '{}' with a different report", current.state),
                ));
            }
            if current.is_terminal() {
                warn!(
                    node_run_id = %node_run_id,
                    state = %current.state,
                    operation,
                    "Rejected write to terminal NodeRun"
                );
                return Err(CoordinatorError::invalid_state(
                    node_run_id.as_str(),
                    current.state,
                    operation,
                ));
            }

            let next = write.apply(&current);
            match self
                .store
                .compare_and_swap(node_run_id, current.version, next)
                .await
            {
                Ok(committed) => {
                    info!(
                        node_run_id = %node_run_id,
                        state = %committed.state,
                        version = committed.version,
                        "NodeRun {}", committed.state
                    );
                    self.events.node_run(write.event(), &committed);
                    return Ok(committed);
                }
                Err(err) if err.is_conflict() => {
                    if write.conflicts_on_lost_race() {
                        let fresh = self.store.get(node_run_id).await?;
                        if fresh.is_terminal() {
                            warn!(
                                node_run_id = %node_run_id,
                                state = %fresh.state,
                                operation,
                                "Lost race to a concurrent terminal write"
                            );
                            return Err(CoordinatorError::conflict(
                                node_run_id.as_str(),
                                format!("NodeRun became '{}' concurrently", fresh.state),
                            ));
                        }
                    }
                    debug!(node_run_id = %node_run_id, operation, attempt, "CAS conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(self.retries_exhausted(node_run_id, operation))
    }

    fn retries_exhausted(&self, node_run_id: &NodeRunId, operation: &str) -> CoordinatorError {
        warn!(
            node_run_id = %node_run_id,
            operation,
            max_retries = self.max_retries,
            "Gave up after repeated CAS conflicts"
        );
        CoordinatorError::conflict(
            node_run_id.as_str(),
            format!(
                "could not {operation} after {} concurrent modifications",
                self.max_retries
            ),
        )
    }
}
