//! Active object identity
//!
//! TigerStyle: Explicit types, assertions, bounded operations.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ObjectId
// =============================================================================

/// Unique identifier for an active object
///
/// Object IDs consist of a namespace and an id. They name an object for
/// logging and error reporting; scheduling state is keyed by the activation
/// itself, so two activations never share a queue even with equal IDs.
///
/// # TigerStyle
/// - Explicit validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ObjectId {
    namespace: String,
    id: String,
}

impl ObjectId {
    /// Create a new ObjectId with validation
    ///
    /// # Errors
    /// Returns error if namespace or id is empty, exceeds length limits or
    /// contains invalid characters.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let id = id.into();

        if namespace.is_empty() || id.is_empty() {
            return Err(Error::InvalidObjectId {
                id: format!("{}:{}", namespace, id),
                reason: "namespace and id must not be empty".into(),
            });
        }

        if namespace.len() > OBJECT_NAMESPACE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidObjectId {
                id: format!("{}:{}", namespace, id),
                reason: format!(
                    "namespace length {} exceeds limit {}",
                    namespace.len(),
                    OBJECT_NAMESPACE_LENGTH_BYTES_MAX
                ),
            });
        }

        if id.len() > OBJECT_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidObjectId {
                id: format!("{}:{}", namespace, id),
                reason: format!(
                    "id length {} exceeds limit {}",
                    id.len(),
                    OBJECT_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        // Alphanumeric, dash, underscore, dot
        let valid_chars = |s: &str| {
            s.chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        };

        if !valid_chars(&namespace) || !valid_chars(&id) {
            return Err(Error::InvalidObjectId {
                id: format!("{}:{}", namespace, id),
                reason: "contains invalid characters".into(),
            });
        }

        debug_assert!(namespace.len() <= OBJECT_NAMESPACE_LENGTH_BYTES_MAX);
        debug_assert!(id.len() <= OBJECT_ID_LENGTH_BYTES_MAX);

        Ok(Self { namespace, id })
    }

    /// Get the namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the full qualified name (namespace:id)
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}
