//! Run Coordinator facade
//!
//! [`RunCoordinator`] is the entry point for every caller. It validates
//! requests, composes the store, recorder and dispatcher, and keeps the Run
//! table. Handles are cheap to clone and share one state.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::dispatch::Dispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::EventHub;
use crate::peers::Peers;
use crate::recorder::Recorder;
use crate::store::{InMemoryNodeRunStore, NodeRunStore};
use crate::types::{
    CoordinatorEvent, EvaluationResult, Health, HealthStatus, JsonMap, NodeKind, NodeRun,
    NodeRunCompleteRequest, NodeRunError, NodeRunEventKind, NodeRunId, NodeRunSpec,
    NodeRunsCreateRequest, Run, RunId, RunStartRequest, RunStartResponse, RunState,
    TerminalState, VersionInfo,
};

/// API versions served by this coordinator
pub const SUPPORTED_API_VERSIONS: &[&str] = &["v1"];

struct Inner {
    store: Arc<dyn NodeRunStore>,
    recorder: Recorder,
    dispatcher: Dispatcher,
    events: EventHub,
    runs: DashMap<RunId, Run>,
    service_name: String,
    service_version: String,
}

/// Authoritative state machine for NodeRuns and Runs
#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("service_name", &self.inner.service_name)
            .field("runs", &self.inner.runs.len())
            .field("peers", self.inner.dispatcher.peers())
            .finish_non_exhaustive()
    }
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunCoordinator {
    pub fn builder() -> RunCoordinatorBuilder {
        RunCoordinatorBuilder::default()
    }

    /// Build a coordinator from validated configuration and wired peers
    pub fn from_config(config: &CoordinatorConfig, peers: Peers) -> Self {
        Self::builder()
            .service(&config.service_name, &config.service_version)
            .event_capacity(config.event_capacity)
            .max_cas_retries(config.max_cas_retries)
            .peers(peers)
            .build()
    }

    // ------------------------------------------------------------------
    // NodeRuns
    // ------------------------------------------------------------------

    /// Create queued NodeRuns outside any Run. Never dispatches.
    pub async fn create_node_runs(
        &self,
        specs: Vec<NodeRunSpec>,
    ) -> CoordinatorResult<Vec<NodeRun>> {
        self.create_node_runs_in(NodeRunsCreateRequest::new(specs))
            .await
    }

    /// Create queued NodeRuns, optionally linked to a Run and parent
    pub async fn create_node_runs_in(
        &self,
        request: NodeRunsCreateRequest,
    ) -> CoordinatorResult<Vec<NodeRun>> {
        for spec in &request.node_runs {
            spec.validate().map_err(CoordinatorError::invalid_request)?;
        }

        match (&request.run_id, &request.parent_node_run_id) {
            (None, Some(_)) => {
                return Err(CoordinatorError::invalid_request(
                    "parent_node_run_id requires run_id",
                ));
            }
            (Some(run_id), parent) => {
                if !self.inner.runs.contains_key(run_id) {
                    return Err(CoordinatorError::run_not_found(run_id.as_str()));
                }
                if let Some(parent_id) = parent {
                    let parent = self.inner.store.get(parent_id).await?;
                    if parent.run_id.as_ref() != Some(run_id) {
                        return Err(CoordinatorError::invalid_request(format!(
                            "parent NodeRun {parent_id} does not belong to run {run_id}"
                        )));
                    }
                }
            }
            (None, None) => {}
        }

        let mut created = Vec::with_capacity(request.node_runs.len());
        for spec in request.node_runs {
            let mut node_run = NodeRun::new(spec);
            if let Some(run_id) = &request.run_id {
                node_run = node_run.within_run(run_id.clone(), request.parent_node_run_id.clone());
            }
            let node_run = self.inner.store.put(node_run).await?;
            info!(
                node_run_id = %node_run.node_run_id,
                node_type = %node_run.spec.node_type_ref,
                "NodeRun created"
            );
            self.inner
                .events
                .node_run(NodeRunEventKind::Created, &node_run);
            created.push(node_run);
        }
        Ok(created)
    }

    pub async fn get_node_run(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        debug!(node_run_id = %node_run_id, "Get NodeRun");
        self.inner.store.get(node_run_id).await
    }

    /// Dispatch a queued NodeRun to its executor
    pub async fn dispatch_node_run(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.inner.dispatcher.dispatch(node_run_id).await
    }

    /// Resolve the executor family a NodeRun would be dispatched to
    pub async fn resolve_kind(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeKind> {
        let node_run = self.inner.store.get(node_run_id).await?;
        self.inner.dispatcher.resolve_kind(&node_run).await
    }

    /// Mark a NodeRun `succeeded` with `outputs`
    pub async fn complete_node_run(
        &self,
        node_run_id: &NodeRunId,
        outputs: JsonMap,
    ) -> CoordinatorResult<NodeRun> {
        self.inner
            .recorder
            .record_completion(node_run_id, outputs)
            .await
    }

    /// Mark a NodeRun `failed`
    pub async fn fail_node_run(
        &self,
        node_run_id: &NodeRunId,
        error: NodeRunError,
        outputs: Option<JsonMap>,
    ) -> CoordinatorResult<NodeRun> {
        self.inner
            .recorder
            .record_failure(node_run_id, error, outputs)
            .await
    }

    /// Apply a completion report in its wire form
    pub async fn report_completion(
        &self,
        node_run_id: &NodeRunId,
        request: NodeRunCompleteRequest,
    ) -> CoordinatorResult<NodeRun> {
        match request.state {
            TerminalState::Succeeded => {
                if request.error.is_some() {
                    return Err(CoordinatorError::invalid_request(
                        "a succeeded completion cannot carry an error",
                    ));
                }
                self.complete_node_run(node_run_id, request.outputs.unwrap_or_default())
                    .await
            }
            TerminalState::Failed => {
                let error = request.error.unwrap_or_else(|| {
                    NodeRunError::new("node_run_failed", "NodeRun reported failure")
                });
                self.fail_node_run(node_run_id, error, request.outputs)
                    .await
            }
        }
    }

    /// Attach an evaluation result; does not change state
    pub async fn report_node_run_evaluation(
        &self,
        node_run_id: &NodeRunId,
        result: EvaluationResult,
    ) -> CoordinatorResult<NodeRun> {
        self.inner
            .recorder
            .record_evaluation(node_run_id, result)
            .await
    }

    /// Cancel a non-terminal NodeRun.
    ///
    /// If the NodeRun had been dispatched, its executor is told about the
    /// cancellation. That notification is best-effort: failures are logged
    /// and the cancelled record is returned regardless.
    pub async fn cancel_node_run(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        let cancelled = self.inner.recorder.record_cancellation(node_run_id).await?;

        if let Some(binding) = &cancelled.executor {
            let peers = self.inner.dispatcher.peers();
            let notified = match binding.kind {
                NodeKind::Atomic => match &peers.atomic {
                    Some(client) => client.cancel(node_run_id).await,
                    None => Ok(()),
                },
                NodeKind::Composite => match &peers.composite {
                    Some(client) => client.cancel(node_run_id).await,
                    None => Ok(()),
                },
            };
            if let Err(err) = notified {
                warn!(
                    node_run_id = %node_run_id,
                    kind = %binding.kind,
                    error = %err,
                    "Executor cancel notification failed"
                );
            }
        }

        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Start a Run and create its queued root NodeRun
    pub async fn start_run(&self, request: RunStartRequest) -> CoordinatorResult<RunStartResponse> {
        request
            .root
            .validate()
            .map_err(CoordinatorError::invalid_request)?;

        let run_id = request.run_id.unwrap_or_else(RunId::generate);
        if self.inner.runs.contains_key(&run_id) {
            return Err(CoordinatorError::AlreadyExists {
                entity: "Run",
                id: run_id.to_string(),
            });
        }

        let root = NodeRun::new(request.root).within_run(run_id.clone(), None);
        let run = Run {
            run_id: run_id.clone(),
            state: RunState::Running,
            root_node_run_id: root.node_run_id.clone(),
            run_context: request.run_context,
            started_at: Utc::now(),
            ended_at: None,
            extensions: request.extensions,
        };

        // Claim the run id before the root becomes visible
        match self.inner.runs.entry(run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoordinatorError::AlreadyExists {
                    entity: "Run",
                    id: run_id.to_string(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(run.clone());
            }
        }

        let root = match self.inner.store.put(root).await {
            Ok(root) => root,
            Err(err) => {
                self.inner.runs.remove(&run_id);
                return Err(err);
            }
        };

        info!(run_id = %run_id, root_node_run_id = %root.node_run_id, "Run started");
        self.inner.events.run(&run);
        self.inner.events.node_run(NodeRunEventKind::Created, &root);

        Ok(RunStartResponse {
            run,
            root_node_run: root,
        })
    }

    pub fn get_run(&self, run_id: &RunId) -> CoordinatorResult<Run> {
        self.inner
            .runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::run_not_found(run_id.as_str()))
    }

    /// Cancel a Run. A Run that already ended is returned unchanged.
    pub fn cancel_run(&self, run_id: &RunId) -> CoordinatorResult<Run> {
        let cancelled = {
            let mut entry = self
                .inner
                .runs
                .get_mut(run_id)
                .ok_or_else(|| CoordinatorError::run_not_found(run_id.as_str()))?;
            let run = entry.value_mut();
            if run.is_terminal() {
                debug!(run_id = %run_id, state = %run.state, "Run already ended");
                return Ok(run.clone());
            }
            run.state = RunState::Cancelled;
            run.ended_at = Some(Utc::now());
            run.clone()
        };

        info!(run_id = %run_id, "Run cancelled");
        self.inner.events.run(&cancelled);
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Service
    // ------------------------------------------------------------------

    pub fn health(&self) -> Health {
        Health {
            status: HealthStatus::Ok,
            time: Utc::now(),
        }
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            service_name: self.inner.service_name.clone(),
            service_version: self.inner.service_version.clone(),
            supported_api_versions: SUPPORTED_API_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    /// Subscribe to committed NodeRun and Run changes
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Number of stored NodeRuns
    pub async fn node_run_count(&self) -> usize {
        self.inner.store.len().await
    }
}

/// Builder for [`RunCoordinator`]
pub struct RunCoordinatorBuilder {
    store: Option<Arc<dyn NodeRunStore>>,
    peers: Peers,
    event_capacity: usize,
    max_cas_retries: usize,
    service_name: String,
    service_version: String,
}

impl Default for RunCoordinatorBuilder {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            store: None,
            peers: Peers::default(),
            event_capacity: defaults.event_capacity,
            max_cas_retries: defaults.max_cas_retries,
            service_name: defaults.service_name,
            service_version: defaults.service_version,
        }
    }
}

impl RunCoordinatorBuilder {
    /// Use a custom store; defaults to [`InMemoryNodeRunStore`]
    pub fn store(mut self, store: Arc<dyn NodeRunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn peers(mut self, peers: Peers) -> Self {
        self.peers = peers;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn max_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries;
        self
    }

    pub fn service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service_name = name.into();
        self.service_version = version.into();
        self
    }

    pub fn build(self) -> RunCoordinator {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryNodeRunStore::new()));
        let events = EventHub::new(self.event_capacity);
        let recorder =
            Recorder::new(store.clone(), events.clone()).with_max_retries(self.max_cas_retries);
        let dispatcher = Dispatcher::new(store.clone(), recorder.clone(), events.clone(), self.peers)
            .with_max_retries(self.max_cas_retries);

        RunCoordinator {
            inner: Arc::new(Inner {
                store,
                recorder,
                dispatcher,
                events,
                runs: DashMap::new(),
                service_name: self.service_name,
                service_version: self.service_version,
            }),
        }
    }
}
