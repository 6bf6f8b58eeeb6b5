//! # ARP Run Coordinator
//!
//! The Run Coordinator is the single authority over NodeRun and Run state in
//! an ARP deployment. Executors, selection services and policy points are
//! peers; only the coordinator writes lifecycle state.
//!
//! ## Features
//!
//! - **NodeRun state machine**: `queued -> running -> succeeded | failed`,
//!   with `cancelled` reachable from any non-terminal state
//! - **Optimistic store**: every write is a compare-and-swap on `version`
//! - **Dispatch**: registry lookup, policy check, candidate selection and an
//!   at-most-once executor call per claim
//! - **Runs**: a Run wraps a root NodeRun and scopes its children
//! - **HTTP Server**: the `/v1` API with SSE event streams (requires `server` feature)
//! - **HTTP Client**: typed client and HTTP peers (requires `client` feature)
//! - **Test fakes**: in-memory peers (requires `testing` feature)
//!
//! ## Example
//!
//! ```rust
//! use arp_coordinator::{RunCoordinator, types::{NodeRunSpec, NodeRunState}};
//!
//! # tokio_test::block_on(async {
//! let coordinator = RunCoordinator::default();
//!
//! let created = coordinator
//!     .create_node_runs(vec![NodeRunSpec::new("add").with_inputs(serde_json::json!({"a": 1, "b": 2}))])
//!     .await
//!     .unwrap();
//! let id = created[0].node_run_id.clone();
//! assert_eq!(created[0].state, NodeRunState::Queued);
//!
//! let mut outputs = serde_json::Map::new();
//! outputs.insert("result".into(), serde_json::json!(3));
//! let done = coordinator.complete_node_run(&id, outputs).await.unwrap();
//! assert_eq!(done.state, NodeRunState::Succeeded);
//! # });
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod peers;
pub mod recorder;
pub mod store;
pub mod types;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::{ConfigError, CoordinatorConfig, CoordinatorConfigBuilder, PeerUrls};
pub use coordinator::{RunCoordinator, RunCoordinatorBuilder, SUPPORTED_API_VERSIONS};
pub use dispatch::Dispatcher;
pub use error::{CoordinatorError, CoordinatorResult, ErrorResponse};
pub use events::{DEFAULT_EVENT_CAPACITY, EventHub};
pub use peers::{
    AtomicExecutorClient, CompositeExecutorClient, NodeRegistryClient, Peers,
    PolicyDecisionClient, SelectionClient,
};
pub use recorder::{DEFAULT_MAX_CAS_RETRIES, Recorder};
pub use store::{InMemoryNodeRunStore, NodeRunStore};

#[cfg(feature = "client")]
pub use client::RunCoordinatorClient;

#[cfg(feature = "server")]
pub use server::{CoordinatorServer, shutdown_signal};
