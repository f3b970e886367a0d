//! Error types for Concerto
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Concerto operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem found while building a class compatibility table
///
/// Class activation collects every problem before failing, so a
/// misconfigured class reports all of them at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at {location}: undefined group '{group}'")]
    UndefinedGroup { location: String, group: String },

    #[error("duplicate group definition '{group}'")]
    DuplicateGroup { group: String },

    #[error("malformed rule {groups:?}: {reason}")]
    MalformedRule { groups: Vec<String>, reason: String },

    #[error("at {location}: unresolvable condition '{condition}'")]
    UnresolvedCondition { location: String, condition: String },

    #[error("at method '{method}': unresolvable method name '{peer}'")]
    UndefinedMethod { method: String, peer: String },

    #[error("at method '{method}': undefined field '{field}'")]
    UndefinedField { method: String, field: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("too many {what}: {count} exceeds limit {limit}")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },
}

/// Concerto error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors (raised at class activation, never mid-service)
    // =========================================================================
    #[error("class '{class}' has {} compatibility definition error(s): {}", .errors.len(), join_errors(.errors))]
    ClassDefinition {
        class: String,
        errors: Vec<ConfigError>,
    },

    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Invalid object ID: {id}, reason: {reason}")]
    InvalidObjectId { id: String, reason: String },

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    #[error("Unknown method: {method} on object {object}")]
    UnknownMethod { object: String, method: String },

    #[error("Object terminated: {object}")]
    ObjectTerminated { object: String },

    #[error("Invocation failed: {object}, method: {method}, reason: {reason}")]
    InvocationFailed {
        object: String,
        method: String,
        reason: String,
    },

    #[error("Invocation panicked: {object}, method: {method}")]
    InvocationPanicked { object: String, method: String },

    #[error("Invocation timed out: {object}, method: {method} after {timeout_ms}ms")]
    InvocationTimeout {
        object: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("Reentrant call depth {depth} exceeds limit {limit}")]
    ReentrancyDepthExceeded { depth: usize, limit: usize },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create the uniform termination error
    pub fn terminated(object: impl Into<String>) -> Self {
        Self::ObjectTerminated {
            object: object.into(),
        }
    }

    /// Create an invocation failed error
    pub fn invocation_failed(
        object: impl Into<String>,
        method: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvocationFailed {
            object: object.into(),
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error was raised while activating a class
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ClassDefinition { .. } | Self::InvalidConfiguration { .. }
        )
    }

    /// Check if this error reports object termination
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::ObjectTerminated { .. })
    }
}
