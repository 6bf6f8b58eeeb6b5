//! Identifier newtypes for Runs and NodeRuns.
//!
//! Identifiers are opaque to callers. Generated identifiers use the
//! `node_run_<hex>` / `run_<hex>` shape; caller-supplied identifiers (from a
//! URL path or a start-run request) are validated before use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum identifier length
pub const MAX_ID_LENGTH: usize = 128;

/// Identifier validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("identifier exceeds {MAX_ID_LENGTH} characters ({0})")]
    TooLong(usize),

    #[error("identifier contains invalid character '{0}'")]
    InvalidCharacter(char),
}

impl From<IdError> for crate::error::CoordinatorError {
    fn from(err: IdError) -> Self {
        crate::error::CoordinatorError::invalid_request(err.to_string())
    }
}

fn validate(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(IdError::TooLong(id.len()));
    }
    match id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        Some(c) => Err(IdError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Allocate a fresh identifier
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            /// Parse and validate a caller-supplied identifier
            pub fn parse(id: impl AsRef<str>) -> Result<Self, IdError> {
                let id = id.as_ref();
                validate(id)?;
                Ok(Self(id.to_string()))
            }

            /// Get the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate(&value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Unique identifier of a NodeRun, immutable for the lifetime of the process
    NodeRunId,
    "node_run"
);

define_id!(
    /// Unique identifier of a Run
    RunId,
    "run"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_valid() {
        let id = NodeRunId::generate();
        assert!(id.as_str().starts_with("node_run_"));
        assert!(NodeRunId::parse(id.as_str()).is_ok());

        let run = RunId::generate();
        assert!(run.as_str().starts_with("run_"));
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(NodeRunId::generate(), NodeRunId::generate());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(NodeRunId::parse(""), Err(IdError::Empty));
        assert_eq!(
            NodeRunId::parse("a/b"),
            Err(IdError::InvalidCharacter('/'))
        );
        assert!(matches!(
            RunId::parse("x".repeat(MAX_ID_LENGTH + 1)),
            Err(IdError::TooLong(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let parsed: NodeRunId = serde_json::from_str("\"node_run_abc\"").unwrap();
        assert_eq!(parsed.as_str(), "node_run_abc");

        let invalid = serde_json::from_str::<NodeRunId>("\"has space\"");
        assert!(invalid.is_err());
    }
}
