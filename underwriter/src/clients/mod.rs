//! External collaborator contracts.
//!
//! The pipeline never performs inference, retrieval, registry lookups, or
//! storage itself; it orchestrates calls against these traits. Production
//! deployments wire in real service clients; tests and benches use the mocks
//! in [`crate::testing`] and the in-memory store here.

mod memory;

pub use memory::MemoryArtifactStore;

use crate::core::ArtifactRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced by collaborators.
///
/// The stage executor maps `Timeout`, `Throttled` and `Transport` to
/// retryable stage errors and everything else to fatal validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The provider rejected the call due to throttling.
    #[error("throttled: {0}")]
    Throttled(String),

    /// A transient transport failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The collaborator rejected the payload as malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No object exists under the requested key.
    #[error("no object at key '{0}'")]
    NotFound(String),
}

impl ClientError {
    /// Returns true if the failure is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Throttled(_) | Self::Transport(_))
    }
}

/// Input to a model invocation: a stored payload, optionally paired with an
/// instruction, or plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelInput {
    /// A stored payload (document image, assembled prompt) by reference.
    Source {
        /// The payload location.
        source: ArtifactRef,
        /// Instruction to apply to the payload, when the payload is not
        /// already a complete prompt.
        prompt: Option<String>,
    },
    /// A plain text prompt.
    Text(String),
}

/// Output of a model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// The generated text.
    pub text: String,
    /// Structured fields, when the model returned them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

impl ModelOutput {
    /// Creates a text-only output.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: None,
        }
    }

    /// Creates an output carrying structured fields.
    #[must_use]
    pub fn with_fields(text: impl Into<String>, fields: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            fields: Some(fields),
        }
    }
}

/// A ranked passage returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// The passage text.
    pub text: String,
    /// Relevance score.
    pub score: f64,
}

/// A vehicle-registry record for an applicant.
///
/// An absent record is a valid lookup result, not an error; downstream
/// stages must handle an empty record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// The license status (e.g. `full_license`, `learners_permit`).
    pub license_status: String,
    /// Recorded violations, or `["none"]` for a clean record.
    pub violations: Vec<String>,
}

/// The text/image-understanding inference collaborator.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Invokes a model and blocks until output or error.
    async fn invoke_model(
        &self,
        model_id: &str,
        input: ModelInput,
    ) -> Result<ModelOutput, ClientError>;
}

/// The knowledge-corpus retrieval collaborator.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Retrieves ranked passages for a query. An empty result is valid.
    async fn retrieve(&self, corpus_id: &str, query: &str) -> Result<Vec<Passage>, ClientError>;
}

/// The vehicle-registry lookup collaborator.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Looks up an applicant. `None` means no record was found, which is a
    /// valid result.
    async fn lookup(
        &self,
        name: &str,
        license_number: &str,
    ) -> Result<Option<RegistryRecord>, ClientError>;
}

/// The object store holding documents and intermediate artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes a payload under a key. Keys are write-once.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<ArtifactRef, ClientError>;

    /// Reads a payload by reference.
    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_transience() {
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::Throttled("slow down".to_string()).is_transient());
        assert!(ClientError::Transport("reset".to_string()).is_transient());
        assert!(!ClientError::InvalidInput("bad".to_string()).is_transient());
        assert!(!ClientError::NotFound("k".to_string()).is_transient());
    }

    #[test]
    fn test_model_output_constructors() {
        let output = ModelOutput::text("APPROVED");
        assert!(output.fields.is_none());

        let output =
            ModelOutput::with_fields("ok", serde_json::json!({"name": "Jane Doe"}));
        assert!(output.fields.is_some());
    }

    #[test]
    fn test_registry_record_serialization() {
        let record = RegistryRecord {
            license_status: "full_license".to_string(),
            violations: vec!["none".to_string()],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["license_status"], "full_license");
    }
}
