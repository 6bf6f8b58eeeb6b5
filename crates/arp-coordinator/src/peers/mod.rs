//! Peer service interfaces
//!
//! The coordinator depends on five collaborators, each behind a narrow async
//! trait. Only the executors are required for dispatch; the registry,
//! selection service and policy decision point are consulted when present.
//! HTTP implementations live in [`http`] behind the `client` feature.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CoordinatorResult;
use crate::types::{
    AtomicExecuteRequest, CandidateSet, CandidateSetRequest, CompositeBeginRequest, DispatchAck,
    NodeRunId, NodeTypeInfo, NodeTypeRef, PolicyDecision, PolicyDecisionRequest,
};

#[cfg(feature = "client")]
pub mod http;

/// Executes atomic NodeRuns
#[async_trait]
pub trait AtomicExecutorClient: Send + Sync {
    async fn execute(&self, request: AtomicExecuteRequest) -> CoordinatorResult<DispatchAck>;

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()>;

    /// Base URL recorded in the NodeRun's executor binding
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Decomposes and drives composite NodeRuns
#[async_trait]
pub trait CompositeExecutorClient: Send + Sync {
    async fn begin(&self, request: CompositeBeginRequest) -> CoordinatorResult<DispatchAck>;

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()>;

    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Proposes candidate node types for composite work
#[async_trait]
pub trait SelectionClient: Send + Sync {
    async fn generate_candidate_set(
        &self,
        request: CandidateSetRequest,
    ) -> CoordinatorResult<CandidateSet>;
}

/// Resolves node type metadata
#[async_trait]
pub trait NodeRegistryClient: Send + Sync {
    async fn get_node_type(&self, node_type_ref: &NodeTypeRef) -> CoordinatorResult<NodeTypeInfo>;
}

/// Authorizes coordinator actions
#[async_trait]
pub trait PolicyDecisionClient: Send + Sync {
    async fn decide(&self, request: PolicyDecisionRequest) -> CoordinatorResult<PolicyDecision>;
}

/// The set of collaborators wired into a coordinator
#[derive(Clone, Default)]
pub struct Peers {
    pub atomic: Option<Arc<dyn AtomicExecutorClient>>,
    pub composite: Option<Arc<dyn CompositeExecutorClient>>,
    pub selection: Option<Arc<dyn SelectionClient>>,
    pub registry: Option<Arc<dyn NodeRegistryClient>>,
    pub pdp: Option<Arc<dyn PolicyDecisionClient>>,
}

impl std::fmt::Debug for Peers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peers")
            .field("atomic", &self.atomic.is_some())
            .field("composite", &self.composite.is_some())
            .field("selection", &self.selection.is_some())
            .field("registry", &self.registry.is_some())
            .field("pdp", &self.pdp.is_some())
            .finish()
    }
}

impl Peers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_atomic(mut self, client: Arc<dyn AtomicExecutorClient>) -> Self {
        self.atomic = Some(client);
        self
    }

    pub fn with_composite(mut self, client: Arc<dyn CompositeExecutorClient>) -> Self {
        self.composite = Some(client);
        self
    }

    pub fn with_selection(mut self, client: Arc<dyn SelectionClient>) -> Self {
        self.selection = Some(client);
        self
    }

    pub fn with_registry(mut self, client: Arc<dyn NodeRegistryClient>) -> Self {
        self.registry = Some(client);
        self
    }

    pub fn with_pdp(mut self, client: Arc<dyn PolicyDecisionClient>) -> Self {
        self.pdp = Some(client);
        self
    }
}
