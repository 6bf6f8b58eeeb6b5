//! Run Coordinator HTTP Client
//!
//! Typed client for the coordinator's `/v1` API, used by executors,
//! operators and the CLI.
//!
//! | Method | Route |
//! |--------|-------|
//! | [`start_run`](RunCoordinatorClient::start_run) | `POST /v1/runs` |
//! | [`get_run`](RunCoordinatorClient::get_run) | `GET /v1/runs/{run_id}` |
//! | [`cancel_run`](RunCoordinatorClient::cancel_run) | `POST /v1/runs/{run_id}/cancel` |
//! | [`create_node_runs`](RunCoordinatorClient::create_node_runs) | `POST /v1/node-runs` |
//! | [`get_node_run`](RunCoordinatorClient::get_node_run) | `GET /v1/node-runs/{id}` |
//! | [`dispatch`](RunCoordinatorClient::dispatch) | `POST /v1/node-runs/{id}/dispatch` |
//! | [`complete`](RunCoordinatorClient::complete) | `POST /v1/node-runs/{id}/complete` |
//! | [`report_evaluation`](RunCoordinatorClient::report_evaluation) | `POST /v1/node-runs/{id}/evaluation` |
//! | [`cancel`](RunCoordinatorClient::cancel) | `POST /v1/node-runs/{id}/cancel` |
//! | [`stream_node_run_events`](RunCoordinatorClient::stream_node_run_events) | `GET /v1/node-runs/{id}/events` |
//!
//! # Example
//!
//! ```rust,ignore
//! use arp_coordinator::client::RunCoordinatorClient;
//! use arp_coordinator::types::{NodeRunCompleteRequest, NodeRunSpec};
//!
//! let client = RunCoordinatorClient::new("http://127.0.0.1:8081")?;
//! let created = client.create_node_runs(vec![NodeRunSpec::new("add")]).await?;
//! let id = &created[0].node_run_id;
//! client.dispatch(id).await?;
//! ```
//!
//! Error bodies returned by the server are decoded back into the matching
//! [`CoordinatorError`] variant, so `is_not_found()` and friends work on
//! both sides of the wire.

use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::peers::http::HttpPeer;
use crate::types::{
    CoordinatorEvent, EvaluationResult, Health, NodeRun, NodeRunCompleteRequest,
    NodeRunEvaluationReport, NodeRunId, NodeRunSpec, NodeRunsCreateRequest,
    NodeRunsCreateResponse, Run, RunId, RunStartRequest, RunStartResponse, VersionInfo,
};

const SERVICE: &str = "run_coordinator";

/// Default timeout for unary requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for event streams
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Stream of coordinator events
pub type EventStream = Pin<Box<dyn Stream<Item = CoordinatorResult<CoordinatorEvent>> + Send>>;

/// Client for a remote Run Coordinator
#[derive(Debug, Clone)]
pub struct RunCoordinatorClient {
    api: HttpPeer,
    streams: HttpPeer,
}

impl RunCoordinatorClient {
    pub fn new(base_url: impl AsRef<str>) -> CoordinatorResult<Self> {
        let url = Url::parse(base_url.as_ref())?;
        Self::with_timeouts(url, DEFAULT_TIMEOUT, DEFAULT_STREAM_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: Url,
        timeout: Duration,
        stream_timeout: Duration,
    ) -> CoordinatorResult<Self> {
        Ok(Self {
            api: HttpPeer::new(SERVICE, base_url.clone(), timeout)?,
            streams: HttpPeer::new(SERVICE, base_url, stream_timeout)?,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api = self.api.with_bearer_token(token.clone());
        self.streams = self.streams.with_bearer_token(token);
        self
    }

    pub fn base_url(&self) -> &Url {
        self.api.base_url()
    }

    pub async fn health(&self) -> CoordinatorResult<Health> {
        self.api.health().await
    }

    pub async fn version(&self) -> CoordinatorResult<VersionInfo> {
        self.api.version().await
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub async fn start_run(&self, request: &RunStartRequest) -> CoordinatorResult<RunStartResponse> {
        self.api.post_json("v1/runs", request).await
    }

    pub async fn get_run(&self, run_id: &RunId) -> CoordinatorResult<Run> {
        self.api.get_json(&format!("v1/runs/{run_id}")).await
    }

    pub async fn cancel_run(&self, run_id: &RunId) -> CoordinatorResult<Run> {
        self.api
            .post_json(&format!("v1/runs/{run_id}/cancel"), &serde_json::json!({}))
            .await
    }

    // ------------------------------------------------------------------
    // NodeRuns
    // ------------------------------------------------------------------

    /// Create standalone NodeRuns
    pub async fn create_node_runs(&self, specs: Vec<NodeRunSpec>) -> CoordinatorResult<Vec<NodeRun>> {
        self.create_node_runs_in(&NodeRunsCreateRequest::new(specs))
            .await
    }

    pub async fn create_node_runs_in(
        &self,
        request: &NodeRunsCreateRequest,
    ) -> CoordinatorResult<Vec<NodeRun>> {
        let response: NodeRunsCreateResponse = self.api.post_json("v1/node-runs", request).await?;
        Ok(response.node_runs)
    }

    pub async fn get_node_run(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.api
            .get_json(&format!("v1/node-runs/{node_run_id}"))
            .await
    }

    pub async fn dispatch(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.post_node_run_action(node_run_id, "dispatch").await
    }

    pub async fn complete(
        &self,
        node_run_id: &NodeRunId,
        request: &NodeRunCompleteRequest,
    ) -> CoordinatorResult<NodeRun> {
        self.api
            .post_json(&format!("v1/node-runs/{node_run_id}/complete"), request)
            .await
    }

    pub async fn report_evaluation(
        &self,
        node_run_id: &NodeRunId,
        evaluation_result: EvaluationResult,
    ) -> CoordinatorResult<NodeRun> {
        let body = NodeRunEvaluationReport { evaluation_result };
        self.api
            .post_json(&format!("v1/node-runs/{node_run_id}/evaluation"), &body)
            .await
    }

    pub async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.post_node_run_action(node_run_id, "cancel").await
    }

    async fn post_node_run_action(
        &self,
        node_run_id: &NodeRunId,
        action: &str,
    ) -> CoordinatorResult<NodeRun> {
        self.api
            .post_json(
                &format!("v1/node-runs/{node_run_id}/{action}"),
                &serde_json::json!({}),
            )
            .await
    }

    /// Poll until the NodeRun is terminal.
    ///
    /// Fails with `Internal` if `timeout` elapses first.
    pub async fn wait_for_node_run(
        &self,
        node_run_id: &NodeRunId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> CoordinatorResult<NodeRun> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let node_run = self.get_node_run(node_run_id).await?;
            if node_run.is_terminal() {
                return Ok(node_run);
            }
            if tokio::time::Instant::now() + poll_interval > deadline {
                return Err(CoordinatorError::internal_error(format!(
                    "Timed out after {} waiting for NodeRun {node_run_id}",
                    humantime::format_duration(timeout)
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ------------------------------------------------------------------
    // Event streams
    // ------------------------------------------------------------------

    /// Follow a NodeRun's changes.
    ///
    /// The first item is the current snapshot. The stream ends after the
    /// NodeRun reaches a terminal state.
    pub async fn stream_node_run_events(
        &self,
        node_run_id: &NodeRunId,
    ) -> CoordinatorResult<EventStream> {
        self.open_stream(&format!("v1/node-runs/{node_run_id}/events"))
            .await
    }

    /// Follow a Run and the NodeRuns inside it
    pub async fn stream_run_events(&self, run_id: &RunId) -> CoordinatorResult<EventStream> {
        self.open_stream(&format!("v1/runs/{run_id}/events")).await
    }

    async fn open_stream(&self, path: &str) -> CoordinatorResult<EventStream> {
        let response = self.streams.open_event_stream(path).await?;
        let (tx, rx) = tokio::sync::mpsc::channel::<CoordinatorResult<CoordinatorEvent>>(32);

        tokio::spawn(async move {
            use futures::StreamExt;

            let mut stream = response.bytes_stream();
            // Chunks may split a multibyte character, so frames are decoded whole
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.extend_from_slice(&chunk);
                        while let Some(event) = parse_sse_event(&mut buffer) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(CoordinatorError::PeerUnavailable {
                                service: SERVICE,
                                message: format!("Stream error: {e}"),
                            }))
                            .await;
                        return;
                    }
                }
            }
            debug!("Event stream closed");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Take the next complete event off the front of `buffer`.
///
/// Comment frames (keep-alives) are consumed and skipped. A frame that is
/// not valid UTF-8 is dropped.
fn parse_sse_event(buffer: &mut Vec<u8>) -> Option<CoordinatorResult<CoordinatorEvent>> {
    loop {
        let event_end = buffer.windows(2).position(|w| w == b"\n\n")?;
        let raw: Vec<u8> = buffer.drain(..event_end + 2).collect();
        let frame = match String::from_utf8(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Invalid UTF-8 in SSE frame");
                continue;
            }
        };

        let mut data = String::new();
        for line in frame.lines() {
            if let Some(value) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value.trim_start());
            }
        }
        if data.is_empty() {
            continue;
        }

        return Some(
            serde_json::from_str::<CoordinatorEvent>(&data).map_err(|e| {
                warn!(error = %e, "Failed to parse SSE event");
                CoordinatorError::Serialization(e)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeRunEvent, NodeRunEventKind};

    #[test]
    fn test_client_creation() {
        let client = RunCoordinatorClient::new("http://127.0.0.1:8081").unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:8081/");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = RunCoordinatorClient::new("not a url").unwrap_err();
        assert!(matches!(err, CoordinatorError::Url(_)));
    }

    #[test]
    fn test_parse_sse_event_skips_keep_alive() {
        let node_run = NodeRun::new(NodeRunSpec::new("add"));
        let event = CoordinatorEvent::NodeRun(NodeRunEvent::new(NodeRunEventKind::Snapshot, &node_run));
        let json = serde_json::to_string(&event).unwrap();

        let mut buffer =
            format!(":\n\nevent: node_run\ndata: {json}\n\nevent: node_run\n").into_bytes();
        let parsed = parse_sse_event(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed, event);
        assert_eq!(buffer, b"event: node_run\n");
        assert!(parse_sse_event(&mut buffer).is_none());
    }

    #[test]
    fn test_parse_sse_event_keeps_character_split_across_chunks() {
        let node_run = NodeRun::new(NodeRunSpec::new("caf\u{e9}"));
        let event = CoordinatorEvent::NodeRun(NodeRunEvent::new(NodeRunEventKind::Snapshot, &node_run));
        let frame = format!("event: node_run\ndata: {}\n\n", serde_json::to_string(&event).unwrap());
        let bytes = frame.as_bytes();
        let split = frame.find('\u{e9}').unwrap() + 1;
        assert!(!frame.is_char_boundary(split));

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&bytes[..split]);
        assert!(parse_sse_event(&mut buffer).is_none());
        buffer.extend_from_slice(&bytes[split..]);

        let parsed = parse_sse_event(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed, event);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_sse_event_reports_bad_json() {
        let mut buffer = b"data: {not json}\n\n".to_vec();
        let result = parse_sse_event(&mut buffer).unwrap();
        assert!(matches!(result, Err(CoordinatorError::Serialization(_))));
    }
}
