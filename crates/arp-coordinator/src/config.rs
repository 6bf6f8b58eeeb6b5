//! # Environment-Based Configuration
//!
//! ## Environment Variables
//!
//! ### Service
//! - `ARP_RUN_COORDINATOR_BIND` - Listen address (default: `127.0.0.1:8081`)
//! - `ARP_RUN_COORDINATOR_SERVICE_NAME` - Name reported by `/v1/version`
//!   (default: `arp-run-coordinator`)
//! - `ARP_RUN_COORDINATOR_ENABLE_CORS` - Permissive CORS layer (default: false)
//! - `ARP_RUN_COORDINATOR_EVENT_CAPACITY` - Event broadcast buffer (default: 256)
//! - `ARP_RUN_COORDINATOR_MAX_CAS_RETRIES` - CAS attempts per report (default: 16)
//!
//! ### Peers
//! - `ARP_RUN_COORDINATOR_ATOMIC_EXECUTOR_URL`
//! - `ARP_RUN_COORDINATOR_COMPOSITE_EXECUTOR_URL`
//! - `ARP_RUN_COORDINATOR_SELECTION_URL`
//! - `ARP_RUN_COORDINATOR_NODE_REGISTRY_URL`
//! - `ARP_RUN_COORDINATOR_PDP_URL`
//! - `ARP_RUN_COORDINATOR_PEER_BEARER_TOKEN` - Sent to every peer
//! - `ARP_RUN_COORDINATOR_REQUEST_TIMEOUT` - Peer request timeout as a
//!   humantime duration, e.g. `30s` or `1m 30s` (default: `30s`)

use serde::{Serialize, Serializer};
use std::{env, net::SocketAddr, time::Duration};
use url::Url;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::recorder::DEFAULT_MAX_CAS_RETRIES;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Base URLs of peer services; unset peers are not consulted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerUrls {
    pub atomic_executor: Option<Url>,
    pub composite_executor: Option<Url>,
    pub selection: Option<Url>,
    pub node_registry: Option<Url>,
    pub pdp: Option<Url>,
}

/// Validated coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    pub service_name: String,
    pub service_version: String,
    pub peers: PeerUrls,
    #[serde(skip_serializing)]
    pub peer_bearer_token: Option<String>,
    #[serde(serialize_with = "serialize_duration")]
    pub request_timeout: Duration,
    pub enable_cors: bool,
    pub event_capacity: usize,
    pub max_cas_retries: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        // Defaults always validate
        CoordinatorConfigBuilder::default().into_config()
    }
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    /// Load and validate configuration from `ARP_RUN_COORDINATOR_*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        CoordinatorConfigBuilder::from_env()?.build()
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Builder for [`CoordinatorConfig`] with environment variable support
#[derive(Debug, Clone)]
pub struct CoordinatorConfigBuilder {
    bind_addr: SocketAddr,
    service_name: String,
    service_version: String,
    peers: PeerUrls,
    peer_bearer_token: Option<String>,
    request_timeout: Duration,
    enable_cors: bool,
    event_capacity: usize,
    max_cas_retries: usize,
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            service_name: "arp-run-coordinator".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            peers: PeerUrls::default(),
            peer_bearer_token: None,
            request_timeout: Duration::from_secs(30),
            enable_cors: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }
}

impl CoordinatorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(addr) = get_env_parsed::<SocketAddr>("ARP_RUN_COORDINATOR_BIND")? {
            builder = builder.bind_addr(addr);
        }
        if let Some(name) = get_env_string("ARP_RUN_COORDINATOR_SERVICE_NAME") {
            builder = builder.service_name(name);
        }
        if let Some(cors) = get_env_bool("ARP_RUN_COORDINATOR_ENABLE_CORS")? {
            builder = builder.enable_cors(cors);
        }
        if let Some(capacity) = get_env_parsed::<usize>("ARP_RUN_COORDINATOR_EVENT_CAPACITY")? {
            builder = builder.event_capacity(capacity);
        }
        if let Some(retries) = get_env_parsed::<usize>("ARP_RUN_COORDINATOR_MAX_CAS_RETRIES")? {
            builder = builder.max_cas_retries(retries);
        }
        if let Some(timeout) = get_env_duration("ARP_RUN_COORDINATOR_REQUEST_TIMEOUT")? {
            builder = builder.request_timeout(timeout);
        }
        if let Some(token) = get_env_string("ARP_RUN_COORDINATOR_PEER_BEARER_TOKEN") {
            builder = builder.peer_bearer_token(token);
        }

        builder.peers = PeerUrls {
            atomic_executor: get_env_url("ARP_RUN_COORDINATOR_ATOMIC_EXECUTOR_URL")?,
            composite_executor: get_env_url("ARP_RUN_COORDINATOR_COMPOSITE_EXECUTOR_URL")?,
            selection: get_env_url("ARP_RUN_COORDINATOR_SELECTION_URL")?,
            node_registry: get_env_url("ARP_RUN_COORDINATOR_NODE_REGISTRY_URL")?,
            pdp: get_env_url("ARP_RUN_COORDINATOR_PDP_URL")?,
        };

        Ok(builder)
    }

    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    #[must_use]
    pub fn atomic_executor_url(mut self, url: Url) -> Self {
        self.peers.atomic_executor = Some(url);
        self
    }

    #[must_use]
    pub fn composite_executor_url(mut self, url: Url) -> Self {
        self.peers.composite_executor = Some(url);
        self
    }

    #[must_use]
    pub fn selection_url(mut self, url: Url) -> Self {
        self.peers.selection = Some(url);
        self
    }

    #[must_use]
    pub fn node_registry_url(mut self, url: Url) -> Self {
        self.peers.node_registry = Some(url);
        self
    }

    #[must_use]
    pub fn pdp_url(mut self, url: Url) -> Self {
        self.peers.pdp = Some(url);
        self
    }

    #[must_use]
    pub fn peer_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.peer_bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries;
        self
    }

    /// Validate configuration and build [`CoordinatorConfig`]
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        self.validate()?;
        Ok(self.into_config())
    }

    fn into_config(self) -> CoordinatorConfig {
        CoordinatorConfig {
            bind_addr: self.bind_addr,
            service_name: self.service_name,
            service_version: self.service_version,
            peers: self.peers,
            peer_bearer_token: self.peer_bearer_token,
            request_timeout: self.request_timeout,
            enable_cors: self.enable_cors,
            event_capacity: self.event_capacity,
            max_cas_retries: self.max_cas_retries,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout > Duration::from_secs(300) {
            return Err(ConfigError::ValidationError(
                "request_timeout must be <= 5m".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_cas_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_cas_retries must be greater than 0".to_string(),
            ));
        }
        if self
            .peer_bearer_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "peer_bearer_token cannot be blank".to_string(),
            ));
        }
        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.is_empty())
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match get_env_string(key) {
        Some(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        None => Ok(None),
    }
}

fn get_env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_string(key) {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid value '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match get_env_string(key) {
        Some(val) => humantime::parse_duration(&val)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

fn get_env_url(key: &str) -> Result<Option<Url>, ConfigError> {
    get_env_parsed::<Url>(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::builder().build().unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.peers.atomic_executor.is_none());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let result = CoordinatorConfig::builder()
            .request_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = CoordinatorConfig::builder().event_capacity(0).build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = CoordinatorConfig::builder().service_name(" ").build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_serialized_config_hides_token() {
        let config = CoordinatorConfig::builder()
            .peer_bearer_token("secret")
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();

        assert!(json.get("peer_bearer_token").is_none());
        assert_eq!(json["request_timeout"], "30s");
    }
}
