//! Context values: inline JSON or references to stored payloads.

use super::ArtifactRef;
use crate::errors::StageError;
use serde::{Deserialize, Serialize};

/// One entry in an execution's context.
///
/// Small values (a document class, an extracted identity) live inline; large
/// payloads (image bytes, assembled prompts) live in the artifact store and
/// are carried here by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextValue {
    /// An inline JSON value.
    Inline(serde_json::Value),
    /// A reference into the artifact store.
    Reference(ArtifactRef),
}

impl ContextValue {
    /// Wraps a string as an inline value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Inline(serde_json::Value::String(value.into()))
    }

    /// Wraps a serializable value as inline JSON.
    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::Inline(value)
    }

    /// Wraps an artifact reference.
    #[must_use]
    pub fn reference(reference: ArtifactRef) -> Self {
        Self::Reference(reference)
    }

    /// Returns the inline string, if this value is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Inline(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the inline JSON value, if any.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Inline(v) => Some(v),
            Self::Reference(_) => None,
        }
    }

    /// Returns the artifact reference, if this value is one.
    #[must_use]
    pub fn as_reference(&self) -> Option<&ArtifactRef> {
        match self {
            Self::Reference(r) => Some(r),
            Self::Inline(_) => None,
        }
    }

    /// Returns the inline string, or a validation error naming the stage and
    /// key that expected one.
    pub fn expect_str(&self, stage: &str, key: &str) -> Result<&str, StageError> {
        self.as_str().ok_or_else(|| {
            StageError::validation(stage, format!("context key '{key}' is not an inline string"))
        })
    }

    /// Returns the inline JSON value, or a validation error.
    pub fn expect_json(&self, stage: &str, key: &str) -> Result<&serde_json::Value, StageError> {
        self.as_json().ok_or_else(|| {
            StageError::validation(stage, format!("context key '{key}' is not an inline value"))
        })
    }
}
