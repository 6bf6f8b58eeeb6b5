//! In-memory peer implementations for testing.
//!
//! Available behind the `testing` feature flag. Each fake records what the
//! coordinator sent it so tests can assert on dispatch behavior without a
//! network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::peers::{
    AtomicExecutorClient, CompositeExecutorClient, NodeRegistryClient, PolicyDecisionClient,
    SelectionClient,
};
use crate::types::{
    AtomicExecuteRequest, CandidateSet, CandidateSetRequest, CompositeBeginRequest, DispatchAck,
    NodeKind, NodeRunId, NodeTypeInfo, NodeTypeRef, PolicyDecision, PolicyDecisionRequest,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a fake executor answers
#[derive(Debug, Clone)]
pub enum ExecutorBehavior {
    /// Return this acknowledgement
    Ack(DispatchAck),
    /// Fail as if the executor were unreachable
    Unavailable,
}

#[derive(Debug)]
struct Recorded<R> {
    behavior: ExecutorBehavior,
    delay: Option<Duration>,
    requests: Vec<R>,
    cancelled: Vec<NodeRunId>,
}

impl<R> Recorded<R> {
    fn new(behavior: ExecutorBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            requests: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

async fn answer(
    service: &'static str,
    behavior: ExecutorBehavior,
    delay: Option<Duration>,
) -> CoordinatorResult<DispatchAck> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match behavior {
        ExecutorBehavior::Ack(ack) => Ok(ack),
        ExecutorBehavior::Unavailable => Err(CoordinatorError::PeerUnavailable {
            service,
            message: "connection refused".to_string(),
        }),
    }
}

/// Atomic executor that records every request
#[derive(Debug)]
pub struct RecordingAtomicExecutor {
    inner: Mutex<Recorded<AtomicExecuteRequest>>,
}

impl Default for RecordingAtomicExecutor {
    fn default() -> Self {
        Self::new(ExecutorBehavior::Ack(DispatchAck::Accepted))
    }
}

impl RecordingAtomicExecutor {
    pub fn new(behavior: ExecutorBehavior) -> Self {
        Self {
            inner: Mutex::new(Recorded::new(behavior)),
        }
    }

    /// Executor that is never reachable
    pub fn unavailable() -> Self {
        Self::new(ExecutorBehavior::Unavailable)
    }

    /// Delay every answer, widening race windows in concurrency tests
    pub fn with_delay(self, delay: Duration) -> Self {
        locked(&self.inner).delay = Some(delay);
        self
    }

    pub fn set_behavior(&self, behavior: ExecutorBehavior) {
        locked(&self.inner).behavior = behavior;
    }

    pub fn requests(&self) -> Vec<AtomicExecuteRequest> {
        locked(&self.inner).requests.clone()
    }

    pub fn cancelled(&self) -> Vec<NodeRunId> {
        locked(&self.inner).cancelled.clone()
    }
}

#[async_trait]
impl AtomicExecutorClient for RecordingAtomicExecutor {
    async fn execute(&self, request: AtomicExecuteRequest) -> CoordinatorResult<DispatchAck> {
        let (behavior, delay) = {
            let mut inner = locked(&self.inner);
            inner.requests.push(request);
            (inner.behavior.clone(), inner.delay)
        };
        answer("atomic_executor", behavior, delay).await
    }

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()> {
        locked(&self.inner).cancelled.push(node_run_id.clone());
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some("memory://atomic-executor".to_string())
    }
}

/// Composite executor that records every request
#[derive(Debug)]
pub struct RecordingCompositeExecutor {
    inner: Mutex<Recorded<CompositeBeginRequest>>,
}

impl Default for RecordingCompositeExecutor {
    fn default() -> Self {
        Self::new(ExecutorBehavior::Ack(DispatchAck::Accepted))
    }
}

impl RecordingCompositeExecutor {
    pub fn new(behavior: ExecutorBehavior) -> Self {
        Self {
            inner: Mutex::new(Recorded::new(behavior)),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(ExecutorBehavior::Unavailable)
    }

    pub fn requests(&self) -> Vec<CompositeBeginRequest> {
        locked(&self.inner).requests.clone()
    }

    pub fn cancelled(&self) -> Vec<NodeRunId> {
        locked(&self.inner).cancelled.clone()
    }
}

#[async_trait]
impl CompositeExecutorClient for RecordingCompositeExecutor {
    async fn begin(&self, request: CompositeBeginRequest) -> CoordinatorResult<DispatchAck> {
        let (behavior, delay) = {
            let mut inner = locked(&self.inner);
            inner.requests.push(request);
            (inner.behavior.clone(), inner.delay)
        };
        answer("composite_executor", behavior, delay).await
    }

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()> {
        locked(&self.inner).cancelled.push(node_run_id.clone());
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some("memory://composite-executor".to_string())
    }
}

/// Policy decision point with a fixed answer
#[derive(Debug)]
pub struct StaticPolicy {
    decision: PolicyDecision,
    requests: Mutex<Vec<PolicyDecisionRequest>>,
}

impl StaticPolicy {
    pub fn allow() -> Self {
        Self::new(PolicyDecision::allow())
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(PolicyDecision::deny(reason))
    }

    pub fn new(decision: PolicyDecision) -> Self {
        Self {
            decision,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PolicyDecisionRequest> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl PolicyDecisionClient for StaticPolicy {
    async fn decide(&self, request: PolicyDecisionRequest) -> CoordinatorResult<PolicyDecision> {
        locked(&self.requests).push(request);
        Ok(self.decision.clone())
    }
}

/// Node registry backed by a fixed map of node type ids to kinds
#[derive(Debug, Default)]
pub struct StaticRegistry {
    kinds: HashMap<String, NodeKind>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_type(mut self, node_type_id: impl Into<String>, kind: NodeKind) -> Self {
        self.kinds.insert(node_type_id.into(), kind);
        self
    }
}

#[async_trait]
impl NodeRegistryClient for StaticRegistry {
    async fn get_node_type(&self, node_type_ref: &NodeTypeRef) -> CoordinatorResult<NodeTypeInfo> {
        match self.kinds.get(&node_type_ref.node_type_id) {
            Some(kind) => Ok(NodeTypeInfo {
                node_type_ref: node_type_ref.clone(),
                kind: *kind,
                description: None,
            }),
            None => Err(CoordinatorError::Peer {
                service: "node_registry",
                status: 404,
                message: format!("unknown node type '{node_type_ref}'"),
            }),
        }
    }
}

/// Selection service returning a fixed candidate set
#[derive(Debug)]
pub struct StaticSelection {
    candidate_set: CandidateSet,
    requests: Mutex<Vec<CandidateSetRequest>>,
}

impl StaticSelection {
    pub fn new(candidate_set: CandidateSet) -> Self {
        Self {
            candidate_set,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CandidateSetRequest> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl SelectionClient for StaticSelection {
    async fn generate_candidate_set(
        &self,
        request: CandidateSetRequest,
    ) -> CoordinatorResult<CandidateSet> {
        locked(&self.requests).push(request);
        Ok(self.candidate_set.clone())
    }
}
