//! HTTP implementations of the peer interfaces
//!
//! Every peer shares one request path: JSON over `reqwest`, an optional
//! bearer token, and the same error mapping.
//!
//! | Outcome | Error |
//! |---------|-------|
//! | Connection refused, timeout | `PeerUnavailable` |
//! | Error status with an `ErrorResponse` body | the typed error it encodes |
//! | Any other error status | `Peer { status }` |

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use super::{
    AtomicExecutorClient, CompositeExecutorClient, NodeRegistryClient, Peers,
    PolicyDecisionClient, SelectionClient,
};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult, ErrorResponse};
use crate::types::{
    AtomicExecuteRequest, CandidateSet, CandidateSetRequest, CompositeBeginRequest, DispatchAck,
    Health, NodeRunId, NodeTypeInfo, NodeTypeRef, PolicyDecision, PolicyDecisionRequest,
    VersionInfo,
};

/// Default timeout for peer requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP plumbing for one peer service
#[derive(Clone)]
pub struct HttpPeer {
    service: &'static str,
    base_url: Url,
    http: Client,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPeer")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("has_auth", &self.bearer_token.is_some())
            .finish()
    }
}

impl HttpPeer {
    pub fn new(service: &'static str, base_url: Url, timeout: Duration) -> CoordinatorResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("arp-run-coordinator/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CoordinatorError::internal_error(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self::with_http_client(service, base_url, http))
    }

    pub fn with_http_client(service: &'static str, mut base_url: Url, http: Client) -> Self {
        // Relative joins must extend the base path, not replace its last segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            service,
            base_url,
            http,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> CoordinatorResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> CoordinatorResult<reqwest::Response> {
        let response = self.apply_auth(builder).send().await.map_err(|e| {
            error!(service = self.service, error = %e, "Peer request failed");
            CoordinatorError::PeerUnavailable {
                service: self.service,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.handle_error_response(status, response).await);
        }
        Ok(response)
    }

    async fn handle_error_response(
        &self,
        status: StatusCode,
        response: reqwest::Response,
    ) -> CoordinatorError {
        let error_text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&error_text) {
            Ok(body) => body.into_error(self.service, status.as_u16()),
            Err(_) => CoordinatorError::Peer {
                service: self.service,
                status: status.as_u16(),
                message: error_text,
            },
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CoordinatorResult<T> {
        let status = response.status().as_u16();
        response.json().await.map_err(|e| CoordinatorError::Peer {
            service: self.service,
            status,
            message: format!("invalid response body: {e}"),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CoordinatorResult<T> {
        let url = self.endpoint(path)?;
        debug!(service = self.service, url = %url, "GET");
        let response = self.send(self.http.get(url)).await?;
        self.read_json(response).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CoordinatorResult<T> {
        let url = self.endpoint(path)?;
        debug!(service = self.service, url = %url, "POST");
        let response = self.send(self.http.post(url).json(body)).await?;
        self.read_json(response).await
    }

    /// POST with no body, ignoring any response body
    pub async fn post_empty(&self, path: &str) -> CoordinatorResult<()> {
        let url = self.endpoint(path)?;
        debug!(service = self.service, url = %url, "POST");
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    /// GET an event stream and hand back the open response
    pub(crate) async fn open_event_stream(&self, path: &str) -> CoordinatorResult<reqwest::Response> {
        let url = self.endpoint(path)?;
        debug!(service = self.service, url = %url, "GET (event stream)");
        self.send(self.http.get(url).header("Accept", "text/event-stream"))
            .await
    }

    pub async fn health(&self) -> CoordinatorResult<Health> {
        self.get_json("v1/health").await
    }

    pub async fn version(&self) -> CoordinatorResult<VersionInfo> {
        self.get_json("v1/version").await
    }
}

macro_rules! peer_client {
    ($(#[$meta:meta])* $name:ident, $service:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            peer: HttpPeer,
        }

        impl $name {
            pub fn new(base_url: Url) -> CoordinatorResult<Self> {
                Ok(Self {
                    peer: HttpPeer::new($service, base_url, DEFAULT_TIMEOUT)?,
                })
            }

            pub fn from_peer(peer: HttpPeer) -> Self {
                Self { peer }
            }

            pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
                self.peer = self.peer.with_bearer_token(token);
                self
            }

            /// Peer liveness
            pub async fn health(&self) -> CoordinatorResult<Health> {
                self.peer.health().await
            }

            /// Peer version
            pub async fn version(&self) -> CoordinatorResult<VersionInfo> {
                self.peer.version().await
            }
        }
    };
}

peer_client!(
    /// Atomic Executor over HTTP
    HttpAtomicExecutor,
    "atomic_executor"
);
peer_client!(
    /// Composite Executor over HTTP
    HttpCompositeExecutor,
    "composite_executor"
);
peer_client!(
    /// Selection service over HTTP
    HttpSelectionClient,
    "selection_service"
);
peer_client!(
    /// Node Registry over HTTP
    HttpNodeRegistry,
    "node_registry"
);
peer_client!(
    /// Policy Decision Point over HTTP
    HttpPolicyDecisionPoint,
    "pdp"
);

#[async_trait]
impl AtomicExecutorClient for HttpAtomicExecutor {
    async fn execute(&self, request: AtomicExecuteRequest) -> CoordinatorResult<DispatchAck> {
        self.peer.post_json("v1/atomic-node-runs", &request).await
    }

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()> {
        self.peer
            .post_empty(&format!("v1/atomic-node-runs/{node_run_id}/cancel"))
            .await
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.peer.base_url().to_string())
    }
}

#[async_trait]
impl CompositeExecutorClient for HttpCompositeExecutor {
    async fn begin(&self, request: CompositeBeginRequest) -> CoordinatorResult<DispatchAck> {
        self.peer
            .post_json("v1/composite-node-runs", &request)
            .await
    }

    async fn cancel(&self, node_run_id: &NodeRunId) -> CoordinatorResult<()> {
        self.peer
            .post_empty(&format!("v1/composite-node-runs/{node_run_id}/cancel"))
            .await
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.peer.base_url().to_string())
    }
}

#[async_trait]
impl SelectionClient for HttpSelectionClient {
    async fn generate_candidate_set(
        &self,
        request: CandidateSetRequest,
    ) -> CoordinatorResult<CandidateSet> {
        self.peer.post_json("v1/candidate-sets", &request).await
    }
}

#[async_trait]
impl NodeRegistryClient for HttpNodeRegistry {
    async fn get_node_type(&self, node_type_ref: &NodeTypeRef) -> CoordinatorResult<NodeTypeInfo> {
        let mut url = self.peer.endpoint("v1/node-types")?;
        url.path_segments_mut()
            .map_err(|()| CoordinatorError::internal_error("registry URL cannot be a base"))?
            .pop_if_empty()
            .push(&node_type_ref.node_type_id);
        if let Some(version) = &node_type_ref.version {
            url.query_pairs_mut().append_pair("version", version);
        }
        debug!(service = self.peer.service, url = %url, "GET");
        let response = self.peer.send(self.peer.http.get(url)).await?;
        self.peer.read_json(response).await
    }
}

#[async_trait]
impl PolicyDecisionClient for HttpPolicyDecisionPoint {
    async fn decide(&self, request: PolicyDecisionRequest) -> CoordinatorResult<PolicyDecision> {
        self.peer.post_json("v1/policy:decide", &request).await
    }
}

impl Peers {
    /// Wire HTTP clients for every peer URL present in `config`
    pub fn from_config(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        let peer = |service: &'static str, url: &Url| -> CoordinatorResult<HttpPeer> {
            let peer = HttpPeer::new(service, url.clone(), config.request_timeout)?;
            Ok(match &config.peer_bearer_token {
                Some(token) => peer.with_bearer_token(token.clone()),
                None => peer,
            })
        };

        let urls = &config.peers;
        let mut peers = Peers::new();
        if let Some(url) = &urls.atomic_executor {
            peers = peers.with_atomic(Arc::new(HttpAtomicExecutor::from_peer(peer(
                "atomic_executor",
                url,
            )?)));
        }
        if let Some(url) = &urls.composite_executor {
            peers = peers.with_composite(Arc::new(HttpCompositeExecutor::from_peer(peer(
                "composite_executor",
                url,
            )?)));
        }
        if let Some(url) = &urls.selection {
            peers = peers.with_selection(Arc::new(HttpSelectionClient::from_peer(peer(
                "selection_service",
                url,
            )?)));
        }
        if let Some(url) = &urls.node_registry {
            peers = peers.with_registry(Arc::new(HttpNodeRegistry::from_peer(peer(
                "node_registry",
                url,
            )?)));
        }
        if let Some(url) = &urls.pdp {
            peers = peers.with_pdp(Arc::new(HttpPolicyDecisionPoint::from_peer(peer(
                "pdp", url,
            )?)));
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let peer = HttpPeer::new(
            "atomic_executor",
            Url::parse("http://localhost:9000/api").unwrap(),
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(
            peer.endpoint("v1/health").unwrap().as_str(),
            "http://localhost:9000/api/v1/health"
        );
    }

    #[test]
    fn test_peers_from_config() {
        let config = CoordinatorConfig::builder()
            .atomic_executor_url(Url::parse("http://localhost:9001").unwrap())
            .pdp_url(Url::parse("http://localhost:9005").unwrap())
            .build()
            .unwrap();
        let peers = Peers::from_config(&config).unwrap();

        assert!(peers.atomic.is_some());
        assert!(peers.pdp.is_some());
        assert!(peers.composite.is_none());
        assert!(peers.selection.is_none());
        assert!(peers.registry.is_none());
    }
}
