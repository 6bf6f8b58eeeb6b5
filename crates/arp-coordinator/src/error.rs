//! Run Coordinator Error Types
//!
//! Every fallible coordinator operation returns [`CoordinatorError`]. The
//! variants map one-to-one onto the wire error codes carried by
//! [`ErrorResponse`], so a typed error survives an HTTP round trip.

use crate::types::NodeRunState;
use thiserror::Error;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur in Run Coordinator operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Unknown NodeRun or Run identifier
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record with this identifier already exists
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// Operation is not legal from the record's current state
    #[error("Invalid state for NodeRun {node_run_id}: {reason}")]
    InvalidState { node_run_id: String, reason: String },

    /// Compare-and-swap lost the race or a conflicting payload was reported
    #[error("Conflict on NodeRun {node_run_id}: {reason}")]
    Conflict { node_run_id: String, reason: String },

    /// Executor (or a collaborator consulted for dispatch) was unreachable or errored
    #[error("Dispatch failed for NodeRun {node_run_id}: {reason}")]
    DispatchFailed { node_run_id: String, reason: String },

    /// Authorization was denied
    #[error("Not authorized: {reason}")]
    Unauthorized { reason: String },

    /// Request failed validation
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A peer service answered with an error status
    #[error("{service} returned HTTP {status}: {message}")]
    Peer {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// A peer service could not be reached
    #[error("{service} unavailable: {message}")]
    PeerUnavailable {
        service: &'static str,
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoordinatorError {
    /// Create a NodeRun not found error
    pub fn node_run_not_found(node_run_id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "NodeRun",
            id: node_run_id.into(),
        }
    }

    /// Create a Run not found error
    pub fn run_not_found(run_id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Run",
            id: run_id.into(),
        }
    }

    /// Create an invalid state error for `operation` attempted in `state`
    pub fn invalid_state(
        node_run_id: impl Into<String>,
        state: NodeRunState,
        operation: &str,
    ) -> Self {
        Self::InvalidState {
            node_run_id: node_run_id.into(),
            reason: format!("cannot {operation} a NodeRun in state '{state}'"),
        }
    }

    /// Create a conflict error
    pub fn conflict(node_run_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            node_run_id: node_run_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a version mismatch conflict
    pub fn version_conflict(node_run_id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::conflict(
            node_run_id,
            format!("expected version {expected}, found {actual}"),
        )
    }

    /// Create a dispatch failure
    pub fn dispatch_failed(node_run_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            node_run_id: node_run_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a compare-and-swap conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this is an invalid state error
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Check if the caller may retry after re-reading state.
    ///
    /// Dispatch failures leave the NodeRun queued, so a replay is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::DispatchFailed { .. } | Self::PeerUnavailable { .. }
        )
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { entity: "Run", .. } => "run_not_found",
            Self::NotFound { .. } => "node_run_not_found",
            Self::AlreadyExists { entity: "Run", .. } => "run_already_exists",
            Self::AlreadyExists { .. } => "node_run_already_exists",
            Self::InvalidState { .. } => "invalid_state",
            Self::Conflict { .. } => "conflict",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Peer { .. } => "peer_error",
            Self::PeerUnavailable { .. } => "peer_unavailable",
            Self::Serialization(_) => "serialization_error",
            Self::Url(_) => "invalid_url",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status equivalent
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::InvalidState { .. } | Self::Conflict { .. } => 409,
            Self::Unauthorized { .. } => 403,
            Self::InvalidRequest { .. } | Self::Serialization(_) | Self::Url(_) => 400,
            Self::DispatchFailed { .. } | Self::Peer { .. } | Self::PeerUnavailable { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }
}

/// Wire format for coordinator errors
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Identifiers and reasons needed to rebuild the typed error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn detail(&self, key: &str) -> Option<String> {
        self.details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Rebuild a typed error from a response received from `service`.
    ///
    /// Unknown codes become [`CoordinatorError::Peer`].
    pub fn into_error(self, service: &'static str, status: u16) -> CoordinatorError {
        let id = self.detail("id").unwrap_or_default();
        let node_run_id = self.detail("node_run_id").unwrap_or_default();
        let reason = self.detail("reason").unwrap_or_else(|| self.message.clone());

        match self.code.as_str() {
            "node_run_not_found" => CoordinatorError::node_run_not_found(id),
            "run_not_found" => CoordinatorError::run_not_found(id),
            "run_already_exists" => CoordinatorError::AlreadyExists { entity: "Run", id },
            "node_run_already_exists" => CoordinatorError::AlreadyExists {
                entity: "NodeRun",
                id,
            },
            "invalid_state" => CoordinatorError::InvalidState {
                node_run_id,
                reason,
            },
            "conflict" => CoordinatorError::Conflict {
                node_run_id,
                reason,
            },
            "dispatch_failed" => CoordinatorError::DispatchFailed {
                node_run_id,
                reason,
            },
            "unauthorized" => CoordinatorError::Unauthorized { reason },
            "invalid_request" => CoordinatorError::InvalidRequest { reason },
            _ => CoordinatorError::Peer {
                service,
                status,
                message: self.message,
            },
        }
    }
}

impl From<&CoordinatorError> for ErrorResponse {
    fn from(err: &CoordinatorError) -> Self {
        let details = match err {
            CoordinatorError::NotFound { id, .. } | CoordinatorError::AlreadyExists { id, .. } => {
                Some(serde_json::json!({ "id": id }))
            }
            CoordinatorError::InvalidState {
                node_run_id,
                reason,
            }
            | CoordinatorError::Conflict {
                node_run_id,
                reason,
            }
            | CoordinatorError::DispatchFailed {
                node_run_id,
                reason,
            } => Some(serde_json::json!({ "node_run_id": node_run_id, "reason": reason })),
            CoordinatorError::Unauthorized { reason }
            | CoordinatorError::InvalidRequest { reason } => {
                Some(serde_json::json!({ "reason": reason }))
            }
            _ => None,
        };

        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl From<CoordinatorError> for ErrorResponse {
    fn from(err: CoordinatorError) -> Self {
        ErrorResponse::from(&err)
    }
}
