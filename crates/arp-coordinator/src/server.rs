//! Run Coordinator HTTP Server
//!
//! Exposes a [`RunCoordinator`] over the `/v1` JSON API.
//!
//! # Example
//!
//! ```rust,ignore
//! use arp_coordinator::{RunCoordinator, server::{CoordinatorServer, shutdown_signal}};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = CoordinatorServer::new(RunCoordinator::default());
//!     server.serve("127.0.0.1:8081", shutdown_signal()).await.unwrap();
//! }
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use std::convert::Infallible;
use std::future::Future;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::coordinator::RunCoordinator;
use crate::error::{CoordinatorError, CoordinatorResult, ErrorResponse};
use crate::types::{
    CoordinatorEvent, Health, NodeRun, NodeRunCompleteRequest, NodeRunEvaluationReport,
    NodeRunEvent, NodeRunEventKind, NodeRunId, NodeRunsCreateRequest, NodeRunsCreateResponse,
    Run, RunEvent, RunId, RunStartRequest, RunStartResponse, VersionInfo,
};

/// HTTP front end for a coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorServer {
    coordinator: RunCoordinator,
    enable_cors: bool,
}

impl CoordinatorServer {
    pub fn new(coordinator: RunCoordinator) -> Self {
        Self {
            coordinator,
            enable_cors: false,
        }
    }

    /// Add a permissive CORS layer
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    /// Build the Axum router for this server
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/v1/health", get(health))
            .route("/v1/version", get(version))
            // Runs
            .route("/v1/runs", post(start_run))
            .route("/v1/runs/{run_id}", get(get_run))
            .route("/v1/runs/{run_id}/cancel", post(cancel_run))
            .route("/v1/runs/{run_id}/events", get(run_events))
            // NodeRuns
            .route("/v1/node-runs", post(create_node_runs))
            .route("/v1/node-runs/{node_run_id}", get(get_node_run))
            .route("/v1/node-runs/{node_run_id}/dispatch", post(dispatch_node_run))
            .route("/v1/node-runs/{node_run_id}/complete", post(complete_node_run))
            .route(
                "/v1/node-runs/{node_run_id}/evaluation",
                post(report_node_run_evaluation),
            )
            .route("/v1/node-runs/{node_run_id}/cancel", post(cancel_node_run))
            .route("/v1/node-runs/{node_run_id}/events", get(node_run_events))
            .with_state(self.coordinator.clone())
            .layer(TraceLayer::new_for_http());

        if self.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Serve on `addr` until `shutdown` completes
    pub async fn serve(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> CoordinatorResult<()> {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            CoordinatorError::internal_error(format!("Failed to bind to {addr}: {e}"))
        })?;

        let version = self.coordinator.version();
        info!(
            service = %version.service_name,
            version = %version.service_version,
            address = %addr,
            "Run Coordinator starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CoordinatorError::internal_error(format!("Server error: {e}")))?;

        info!("Run Coordinator stopped");
        Ok(())
    }
}

/// Completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// =============================================================================
// Route Handlers
// =============================================================================

type ApiResult<T> = Result<T, CoordinatorErrorResponse>;

fn node_run_id(raw: &str) -> CoordinatorResult<NodeRunId> {
    Ok(NodeRunId::parse(raw)?)
}

fn run_id(raw: &str) -> CoordinatorResult<RunId> {
    Ok(RunId::parse(raw)?)
}

/// GET /v1/health
async fn health(State(coordinator): State<RunCoordinator>) -> Json<Health> {
    Json(coordinator.health())
}

/// GET /v1/version
async fn version(State(coordinator): State<RunCoordinator>) -> Json<VersionInfo> {
    Json(coordinator.version())
}

/// POST /v1/runs
async fn start_run(
    State(coordinator): State<RunCoordinator>,
    Json(request): Json<RunStartRequest>,
) -> ApiResult<(StatusCode, Json<RunStartResponse>)> {
    let started = coordinator.start_run(request).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// GET /v1/runs/{run_id}
async fn get_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Json<Run>> {
    Ok(Json(coordinator.get_run(&run_id(&raw)?)?))
}

/// POST /v1/runs/{run_id}/cancel
async fn cancel_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Json<Run>> {
    Ok(Json(coordinator.cancel_run(&run_id(&raw)?)?))
}

/// POST /v1/node-runs
async fn create_node_runs(
    State(coordinator): State<RunCoordinator>,
    Json(request): Json<NodeRunsCreateRequest>,
) -> ApiResult<(StatusCode, Json<NodeRunsCreateResponse>)> {
    debug!(count = request.node_runs.len(), "Create NodeRuns");
    let node_runs = coordinator.create_node_runs_in(request).await?;
    Ok((StatusCode::CREATED, Json(NodeRunsCreateResponse { node_runs })))
}

/// GET /v1/node-runs/{node_run_id}
async fn get_node_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Json<NodeRun>> {
    Ok(Json(coordinator.get_node_run(&node_run_id(&raw)?).await?))
}

/// POST /v1/node-runs/{node_run_id}/dispatch
async fn dispatch_node_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Json<NodeRun>> {
    Ok(Json(
        coordinator.dispatch_node_run(&node_run_id(&raw)?).await?,
    ))
}

/// POST /v1/node-runs/{node_run_id}/complete
async fn complete_node_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
    Json(request): Json<NodeRunCompleteRequest>,
) -> ApiResult<Json<NodeRun>> {
    Ok(Json(
        coordinator
            .report_completion(&node_run_id(&raw)?, request)
            .await?,
    ))
}

/// POST /v1/node-runs/{node_run_id}/evaluation
async fn report_node_run_evaluation(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
    Json(report): Json<NodeRunEvaluationReport>,
) -> ApiResult<Json<NodeRun>> {
    Ok(Json(
        coordinator
            .report_node_run_evaluation(&node_run_id(&raw)?, report.evaluation_result)
            .await?,
    ))
}

/// POST /v1/node-runs/{node_run_id}/cancel
async fn cancel_node_run(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Json<NodeRun>> {
    Ok(Json(coordinator.cancel_node_run(&node_run_id(&raw)?).await?))
}

/// GET /v1/node-runs/{node_run_id}/events
async fn node_run_events(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = node_run_id(&raw)?;
    // Subscribe first so nothing committed after the snapshot is missed
    let rx = coordinator.subscribe();
    let snapshot = coordinator.get_node_run(&id).await?;
    debug!(node_run_id = %id, "Subscribing to NodeRun events");

    let initial = CoordinatorEvent::NodeRun(NodeRunEvent::new(NodeRunEventKind::Snapshot, &snapshot));
    let stream = create_sse_stream(
        rx,
        initial,
        move |event| match event {
            CoordinatorEvent::NodeRun(e) => e.node_run_id == id,
            CoordinatorEvent::Run(_) => false,
        },
        |event| matches!(event, CoordinatorEvent::NodeRun(e) if e.is_final()),
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /v1/runs/{run_id}/events
async fn run_events(
    State(coordinator): State<RunCoordinator>,
    Path(raw): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = run_id(&raw)?;
    let rx = coordinator.subscribe();
    let snapshot = coordinator.get_run(&id)?;
    debug!(run_id = %id, "Subscribing to Run events");

    let initial = CoordinatorEvent::Run(RunEvent::new(&snapshot));
    // Child NodeRuns pass through; only the Run's own terminal change ends the stream
    let stream = create_sse_stream(
        rx,
        initial,
        move |event| match event {
            CoordinatorEvent::Run(e) => e.run_id == id,
            CoordinatorEvent::NodeRun(e) => e.node_run.run_id.as_ref() == Some(&id),
        },
        |event| matches!(event, CoordinatorEvent::Run(e) if e.state.is_terminal()),
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// =============================================================================
// Error Response
// =============================================================================

/// Wrapper for coordinator errors that implements IntoResponse
struct CoordinatorErrorResponse(CoordinatorError);

impl From<CoordinatorError> for CoordinatorErrorResponse {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for CoordinatorErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        let body: ErrorResponse = self.0.into();
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Streaming
// =============================================================================

/// Create an SSE stream from a broadcast receiver.
///
/// `initial` is sent first; if it is already final the stream ends there.
/// Live events that fail `filter` are skipped, and the stream closes after
/// the first event matching `is_final`.
fn create_sse_stream<F, D>(
    rx: broadcast::Receiver<CoordinatorEvent>,
    initial: CoordinatorEvent,
    filter: F,
    is_final: D,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: Fn(&CoordinatorEvent) -> bool + Send + 'static,
    D: Fn(&CoordinatorEvent) -> bool + Send + 'static,
{
    async_stream::stream! {
        let done = is_final(&initial);
        yield Ok(to_sse(&initial));
        if done {
            return;
        }

        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) if filter(&event) => {
                    let done = is_final(&event);
                    yield Ok(to_sse(&event));
                    if done {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE subscriber lagged");
                    continue;
                }
            }
        }
    }
}

#[inline]
fn to_sse(event: &CoordinatorEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.event_name()).data(data)
}
