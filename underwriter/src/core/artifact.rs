//! Artifact references and metadata.
//!
//! An artifact is a persisted payload written by exactly one stage and read
//! by any number of downstream stages. Keys are namespaced per execution, so
//! no two executions share state and no key is ever written twice.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reference to a payload in the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// The storage key.
    pub key: String,
}

impl ArtifactRef {
    /// Creates a reference to an arbitrary storage key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Creates a reference namespaced under one execution.
    #[must_use]
    pub fn namespaced(execution_id: Uuid, name: &str) -> Self {
        Self {
            key: format!("executions/{execution_id}/{name}"),
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Metadata for a stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// The storage key the payload lives under.
    pub key: String,
    /// Payload size in bytes.
    pub size: usize,
    /// When the artifact was written (ISO 8601).
    pub created_at: String,
}

impl Artifact {
    /// Creates metadata for a freshly written payload.
    #[must_use]
    pub fn new(key: impl Into<String>, size: usize) -> Self {
        Self {
            key: key.into(),
            size,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
