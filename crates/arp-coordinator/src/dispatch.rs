//! Executor dispatch
//!
//! Dispatch resolves a NodeRun's kind, asks the policy decision point, claims
//! the NodeRun with a `queued -> running` compare-and-swap and only then calls
//! the executor. The claim is the serialization point: concurrent dispatches
//! of the same NodeRun reach the executor at most once.
//!
//! Everything that can fail before the claim (registry, policy, selection)
//! fails without touching the record. An executor that cannot be reached
//! releases the claim and the NodeRun goes back to `queued`.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::EventHub;
use crate::peers::Peers;
use crate::recorder::Recorder;
use crate::store::NodeRunStore;
use crate::types::{
    AtomicExecuteRequest, CandidateSet, CandidateSetRequest, CompositeBeginRequest, DispatchAck,
    ExecutorBinding, NodeKind, NodeRun, NodeRunEventKind, NodeRunId, NodeRunState,
    PolicyDecisionRequest,
};

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn NodeRunStore>,
    recorder: Recorder,
    events: EventHub,
    peers: Peers,
    max_retries: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("peers", &self.peers)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NodeRunStore>,
        recorder: Recorder,
        events: EventHub,
        peers: Peers,
    ) -> Self {
        Self {
            store,
            recorder,
            events,
            peers,
            max_retries: crate::recorder::DEFAULT_MAX_CAS_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    /// Dispatch a queued NodeRun to its executor
    pub async fn dispatch(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        let current = self.store.get(node_run_id).await?;
        if current.state != NodeRunState::Queued {
            warn!(node_run_id = %node_run_id, state = %current.state, "Dispatch of non-queued NodeRun");
            return Err(CoordinatorError::invalid_state(
                node_run_id.as_str(),
                current.state,
                "dispatch",
            ));
        }

        let kind = self.resolve_kind(&current).await?;
        let endpoint = self.executor_endpoint(node_run_id, kind)?;
        self.authorize(&current).await?;
        let candidate_set = match kind {
            NodeKind::Composite => self.select(&current).await?,
            NodeKind::Atomic => None,
        };

        let claimed = self.claim(&current, kind, endpoint).await?;
        info!(node_run_id = %node_run_id, kind = %kind, version = claimed.version, "NodeRun dispatched");
        self.events.node_run(NodeRunEventKind::Dispatched, &claimed);

        let ack = match self.call_executor(&claimed, kind, candidate_set).await {
            Ok(ack) => ack,
            Err(err) => {
                error!(node_run_id = %node_run_id, kind = %kind, error = %err, "Executor call failed");
                if let Err(release_err) = self.release(node_run_id).await {
                    error!(
                        node_run_id = %node_run_id,
                        error = %release_err,
                        "Could not requeue NodeRun after failed dispatch"
                    );
                }
                return Err(CoordinatorError::dispatch_failed(
                    node_run_id.as_str(),
                    err.to_string(),
                ));
            }
        };

        match ack {
            DispatchAck::Accepted => Ok(claimed),
            DispatchAck::Succeeded { outputs } => {
                self.recorder.record_completion(node_run_id, outputs).await
            }
            DispatchAck::Failed { error } => {
                self.recorder.record_failure(node_run_id, error, None).await
            }
        }
    }

    /// Explicit kind, then the registry, then the `composite.` naming convention
    pub async fn resolve_kind(&self, node_run: &NodeRun) -> CoordinatorResult<NodeKind> {
        if let Some(kind) = node_run.spec.kind {
            return Ok(kind);
        }

        let node_type_ref = &node_run.spec.node_type_ref;
        if let Some(registry) = &self.peers.registry {
            let info = registry.get_node_type(node_type_ref).await.map_err(|err| {
                CoordinatorError::dispatch_failed(
                    node_run.node_run_id.as_str(),
                    format!("node registry lookup for '{node_type_ref}' failed: {err}"),
                )
            })?;
            debug!(node_run_id = %node_run.node_run_id, kind = %info.kind, "Kind resolved by registry");
            return Ok(info.kind);
        }

        Ok(NodeKind::from_node_type_id(&node_type_ref.node_type_id))
    }

    fn executor_endpoint(
        &self,
        node_run_id: &NodeRunId,
        kind: NodeKind,
    ) -> CoordinatorResult<Option<String>> {
        let endpoint = match kind {
            NodeKind::Atomic => self.peers.atomic.as_ref().map(|c| c.endpoint()),
            NodeKind::Composite => self.peers.composite.as_ref().map(|c| c.endpoint()),
        };
        endpoint.ok_or_else(|| {
            CoordinatorError::dispatch_failed(
                node_run_id.as_str(),
                format!("no {kind} executor configured"),
            )
        })
    }

    async fn authorize(&self, node_run: &NodeRun) -> CoordinatorResult<()> {
        let Some(pdp) = &self.peers.pdp else {
            return Ok(());
        };

        let request = PolicyDecisionRequest::dispatch(
            &node_run.node_run_id,
            node_run.run_id.as_ref(),
            &node_run.spec,
        );
        let decision = pdp.decide(request).await.map_err(|err| {
            CoordinatorError::dispatch_failed(
                node_run.node_run_id.as_str(),
                format!("policy decision failed: {err}"),
            )
        })?;

        if decision.is_allowed() {
            Ok(())
        } else {
            let reason = decision
                .reason
                .unwrap_or_else(|| "denied by policy".to_string());
            warn!(node_run_id = %node_run.node_run_id, reason = %reason, "Dispatch denied");
            Err(CoordinatorError::Unauthorized { reason })
        }
    }

    async fn select(&self, node_run: &NodeRun) -> CoordinatorResult<Option<CandidateSet>> {
        let Some(selection) = &self.peers.selection else {
            return Ok(None);
        };

        let request = CandidateSetRequest {
            node_run_id: node_run.node_run_id.clone(),
            run_id: node_run.run_id.clone(),
            node_type_ref: node_run.spec.node_type_ref.clone(),
            inputs: node_run.spec.inputs.clone(),
        };
        let candidate_set = selection
            .generate_candidate_set(request)
            .await
            .map_err(|err| {
                CoordinatorError::dispatch_failed(
                    node_run.node_run_id.as_str(),
                    format!("candidate selection failed: {err}"),
                )
            })?;
        Ok(Some(candidate_set))
    }

    /// `queued -> running`; the only writer that wins proceeds to the executor
    async fn claim(
        &self,
        current: &NodeRun,
        kind: NodeKind,
        endpoint: Option<String>,
    ) -> CoordinatorResult<NodeRun> {
        let mut next = current.clone();
        next.state = NodeRunState::Running;
        next.started_at = Some(Utc::now());
        next.executor = Some(ExecutorBinding { kind, endpoint });

        self.store
            .compare_and_swap(&current.node_run_id, current.version, next)
            .await
            .inspect_err(|err| {
                warn!(node_run_id = %current.node_run_id, error = %err, "Lost dispatch claim");
            })
    }

    async fn call_executor(
        &self,
        node_run: &NodeRun,
        kind: NodeKind,
        candidate_set: Option<CandidateSet>,
    ) -> CoordinatorResult<DispatchAck> {
        let spec = &node_run.spec;
        match kind {
            NodeKind::Atomic => {
                let client = self.peers.atomic.as_ref().ok_or_else(|| {
                    CoordinatorError::internal_error("atomic executor disappeared")
                })?;
                client
                    .execute(AtomicExecuteRequest {
                        node_run_id: node_run.node_run_id.clone(),
                        run_id: node_run.run_id.clone(),
                        node_type_ref: spec.node_type_ref.clone(),
                        inputs: spec.inputs.clone(),
                        extensions: spec.extensions.clone(),
                    })
                    .await
            }
            NodeKind::Composite => {
                let client = self.peers.composite.as_ref().ok_or_else(|| {
                    CoordinatorError::internal_error("composite executor disappeared")
                })?;
                client
                    .begin(CompositeBeginRequest {
                        node_run_id: node_run.node_run_id.clone(),
                        run_id: node_run.run_id.clone(),
                        node_type_ref: spec.node_type_ref.clone(),
                        inputs: spec.inputs.clone(),
                        candidate_set,
                        extensions: spec.extensions.clone(),
                    })
                    .await
            }
        }
    }

    /// Return a claimed NodeRun to `queued`.
    ///
    /// A NodeRun that left `running` meanwhile (cancelled, or completed by an
    /// early report) is left as it is.
    async fn release(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()> {
        for _ in 0..self.max_retries {
            let current = self.store.get(node_run_id).await?;
            if current.state != NodeRunState::Running {
                debug!(node_run_id = %node_run_id, state = %current.state, "Nothing to release");
                return Ok(());
            }

            let mut next = current.clone();
            next.state = NodeRunState::Queued;
            next.started_at = None;
            next.executor = None;

            match self
                .store
                .compare_and_swap(node_run_id, current.version, next)
                .await
            {
                Ok(requeued) => {
                    warn!(node_run_id = %node_run_id, version = requeued.version, "NodeRun requeued after failed dispatch");
                    self.events.node_run(NodeRunEventKind::Requeued, &requeued);
                    return Ok(());
                }
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err),
            }
        }

        Err(CoordinatorError::conflict(
            node_run_id.as_str(),
            "could not release dispatch claim",
        ))
    }
}
