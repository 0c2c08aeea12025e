//! Engine configuration, resolved once at process start.
//!
//! Everything environment-specific (model ids, the corpus id, the document
//! bucket, prompt templates, timeouts, the retry policy) lives here and is
//! passed by reference into the engine. The pipeline definition refers to
//! endpoints by alias (`classification`, `extraction`, ...) and the catalog
//! resolves aliases to concrete ids, so redeploying with different models
//! touches configuration, not code.

use crate::executor::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default prompt templates, compiled in from the assets directory.
const CLASSIFICATION_PROMPT: &str = include_str!("../assets/prompts/classification.prompt");
const EXTRACT_IDENTITY_PROMPT: &str = include_str!("../assets/prompts/extract_identity.prompt");
const RETRIEVAL_QUERY: &str =
    include_str!("../assets/prompts/retrieve_underwriting_information.prompt");
const VALIDATION_PROMPT: &str = include_str!("../assets/prompts/underwriting_validation.prompt");

/// Model ids keyed by the aliases stage definitions use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Model classifying the document type.
    #[serde(default = "default_classification_model")]
    pub classification: String,
    /// Model extracting the applicant identity.
    #[serde(default = "default_extraction_model")]
    pub extraction: String,
    /// Model producing the final determination.
    #[serde(default = "default_decision_model")]
    pub decision: String,
    /// Model backing the combined retrieve-and-generate stage.
    #[serde(default = "default_decision_model")]
    pub retrieve_and_generate: String,
}

fn default_classification_model() -> String {
    "anthropic.claude-3-haiku-20240307-v1:0".to_string()
}

fn default_extraction_model() -> String {
    "anthropic.claude-3-haiku-20240307-v1:0".to_string()
}

fn default_decision_model() -> String {
    "anthropic.claude-3-sonnet-20240229-v1:0".to_string()
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            classification: default_classification_model(),
            extraction: default_extraction_model(),
            decision: default_decision_model(),
            retrieve_and_generate: default_decision_model(),
        }
    }
}

impl ModelCatalog {
    /// Resolves a stage's target alias to a model id.
    #[must_use]
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        match alias {
            "classification" => Some(&self.classification),
            "extraction" => Some(&self.extraction),
            "decision" => Some(&self.decision),
            "retrieve_and_generate" => Some(&self.retrieve_and_generate),
            _ => None,
        }
    }
}

/// Prompt templates used by the inference and transform stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSet {
    /// Classification instruction attached to the document image.
    #[serde(default = "default_classification_prompt")]
    pub classification: String,
    /// Identity-extraction instruction attached to the document image.
    #[serde(default = "default_extract_identity_prompt")]
    pub extract_identity: String,
    /// Final validation template with `<document>`, `<driver>` and `<rules>`
    /// slots.
    #[serde(default = "default_validation_prompt")]
    pub validation: String,
}

fn default_classification_prompt() -> String {
    CLASSIFICATION_PROMPT.to_string()
}

fn default_extract_identity_prompt() -> String {
    EXTRACT_IDENTITY_PROMPT.to_string()
}

fn default_validation_prompt() -> String {
    VALIDATION_PROMPT.to_string()
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            classification: default_classification_prompt(),
            extract_identity: default_extract_identity_prompt(),
            validation: default_validation_prompt(),
        }
    }
}

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The model catalog.
    #[serde(default)]
    pub models: ModelCatalog,
    /// The knowledge-corpus id used by retrieval stages.
    #[serde(default = "default_corpus_id")]
    pub corpus_id: String,
    /// The bucket the trigger accepts document uploads from.
    #[serde(default = "default_document_bucket")]
    pub document_bucket: String,
    /// The fixed underwriting query issued by retrieval stages that do not
    /// declare their own.
    #[serde(default = "default_retrieval_query")]
    pub retrieval_query: String,
    /// Prompt templates.
    #[serde(default)]
    pub prompts: PromptSet,
    /// Per-external-call timeout in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Whole-execution deadline in milliseconds.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Retry policy for retryable stage failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whether a failed branch requests best-effort cancellation of its
    /// siblings. Off by default: siblings run to completion before the
    /// aggregate failure is reported.
    #[serde(default)]
    pub cancel_siblings_on_failure: bool,
}

fn default_corpus_id() -> String {
    "underwriting-manual".to_string()
}

fn default_document_bucket() -> String {
    "underwriting-documents".to_string()
}

fn default_retrieval_query() -> String {
    RETRIEVAL_QUERY.trim().to_string()
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_execution_timeout_ms() -> u64 {
    300_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models: ModelCatalog::default(),
            corpus_id: default_corpus_id(),
            document_bucket: default_document_bucket(),
            retrieval_query: default_retrieval_query(),
            prompts: PromptSet::default(),
            stage_timeout_ms: default_stage_timeout_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            retry: RetryPolicy::default(),
            cancel_siblings_on_failure: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the corpus id.
    #[must_use]
    pub fn with_corpus_id(mut self, corpus_id: impl Into<String>) -> Self {
        self.corpus_id = corpus_id.into();
        self
    }

    /// Sets the document bucket.
    #[must_use]
    pub fn with_document_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.document_bucket = bucket.into();
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, ms: u64) -> Self {
        self.stage_timeout_ms = ms;
        self
    }

    /// Sets the whole-execution deadline.
    #[must_use]
    pub fn with_execution_timeout_ms(mut self, ms: u64) -> Self {
        self.execution_timeout_ms = ms;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables best-effort sibling cancellation on branch failure.
    #[must_use]
    pub fn with_cancel_siblings_on_failure(mut self, cancel: bool) -> Self {
        self.cancel_siblings_on_failure = cancel;
        self
    }

    /// The per-call timeout as a `Duration`.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// The execution deadline as a `Duration`.
    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.stage_timeout_ms, 30_000);
        assert_eq!(config.corpus_id, "underwriting-manual");
        assert!(!config.cancel_siblings_on_failure);
        assert!(!config.retrieval_query.is_empty());
    }

    #[test]
    fn test_catalog_resolves_aliases() {
        let catalog = ModelCatalog::default();
        assert!(catalog.resolve("classification").is_some());
        assert!(catalog.resolve("extraction").is_some());
        assert!(catalog.resolve("decision").is_some());
        assert!(catalog.resolve("retrieve_and_generate").is_some());
        assert!(catalog.resolve("embedding").is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig::new()
            .with_corpus_id("kb-123")
            .with_stage_timeout_ms(500)
            .with_cancel_siblings_on_failure(true);

        assert_eq!(config.corpus_id, "kb-123");
        assert_eq!(config.stage_timeout(), Duration::from_millis(500));
        assert!(config.cancel_siblings_on_failure);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"corpus_id": "kb-9"}"#).unwrap();
        assert_eq!(config.corpus_id, "kb-9");
        assert_eq!(config.execution_timeout_ms, 300_000);
    }

    #[test]
    fn test_validation_prompt_has_slots() {
        let prompts = PromptSet::default();
        assert!(prompts.validation.contains("<driver>"));
        assert!(prompts.validation.contains("<rules>"));
        assert!(prompts.validation.contains("<document>"));
    }
}
