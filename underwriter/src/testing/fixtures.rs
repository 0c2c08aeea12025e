//! Ready-made engine harnesses wired to mock collaborators.

use super::{MockInferenceClient, MockRegistryClient, MockRetrievalClient};
use crate::clients::{MemoryArtifactStore, ModelOutput, Passage, RegistryRecord};
use crate::config::{EngineConfig, ModelCatalog};
use crate::definition::PipelineDefinition;
use crate::executor::RetryPolicy;
use crate::pipeline::PipelineEngine;
use std::sync::Arc;

const PARALLEL_DEFINITION: &str = include_str!("../../assets/definitions/parallel.json");
const COMBINED_DEFINITION: &str = include_str!("../../assets/definitions/combined.json");

/// An engine plus handles to every mock behind it.
pub struct TestHarness {
    /// The engine under test.
    pub engine: Arc<PipelineEngine>,
    /// The mock inference collaborator.
    pub inference: Arc<MockInferenceClient>,
    /// The mock retrieval collaborator.
    pub retrieval: Arc<MockRetrievalClient>,
    /// The mock registry collaborator.
    pub registry: Arc<MockRegistryClient>,
    /// The in-memory artifact store, pre-seeded with `uploads/doc123.png`.
    pub store: Arc<MemoryArtifactStore>,
}

/// A configuration with distinct per-role model ids, fast retries, and
/// short timeouts, suitable for deterministic tests.
#[must_use]
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::new()
        .with_stage_timeout_ms(1_000)
        .with_execution_timeout_ms(5_000)
        .with_retry(RetryPolicy::new().with_base_delay_ms(1).without_jitter());
    config.models = ModelCatalog {
        classification: "model-classification".to_string(),
        extraction: "model-extraction".to_string(),
        decision: "model-decision".to_string(),
        retrieve_and_generate: "model-retrieve-and-generate".to_string(),
    };
    config
}

/// The canonical two-branch topology shipped in the assets directory.
#[must_use]
pub fn parallel_definition() -> PipelineDefinition {
    PipelineDefinition::from_json_str(PARALLEL_DEFINITION)
        .expect("shipped parallel definition parses")
}

/// The earlier single retrieve-and-generate topology.
#[must_use]
pub fn combined_definition() -> PipelineDefinition {
    PipelineDefinition::from_json_str(COMBINED_DEFINITION)
        .expect("shipped combined definition parses")
}

/// Builds a harness for an arbitrary definition with the happy-path script:
/// a driver's license classifies, Jane Doe extracts, the registry finds a
/// valid record, the corpus returns three passages, and the decision model
/// approves.
#[must_use]
pub fn harness(definition: PipelineDefinition) -> TestHarness {
    harness_with_config(definition, test_config())
}

/// Builds a happy-path harness with a custom configuration.
#[must_use]
pub fn harness_with_config(definition: PipelineDefinition, config: EngineConfig) -> TestHarness {
    let inference = Arc::new(MockInferenceClient::new());
    inference.set_response("model-classification", ModelOutput::text("drivers_license"));
    inference.set_response(
        "model-extraction",
        ModelOutput::text("name: Jane Doe, license: D1234567"),
    );
    inference.set_response("model-decision", ModelOutput::text("APPROVED"));
    inference.set_response("model-retrieve-and-generate", ModelOutput::text("APPROVED"));

    let retrieval = Arc::new(MockRetrievalClient::new());
    retrieval.set_passages(vec![
        Passage {
            text: "A full license in good standing qualifies for coverage.".to_string(),
            score: 0.92,
        },
        Passage {
            text: "Learner's permits require a licensed co-driver on the policy.".to_string(),
            score: 0.81,
        },
        Passage {
            text: "Applicants with a suspended license must be referred for manual review."
                .to_string(),
            score: 0.77,
        },
    ]);

    let registry = Arc::new(MockRegistryClient::new());
    registry.set_record(Some(RegistryRecord {
        license_status: "valid".to_string(),
        violations: vec!["none".to_string()],
    }));

    let store = Arc::new(MemoryArtifactStore::new());
    store.seed("uploads/doc123.png", b"\x89PNG\r\n\x1a\nfake-image-bytes".to_vec());

    let engine = PipelineEngine::new(
        definition,
        config,
        inference.clone(),
        retrieval.clone(),
        registry.clone(),
        store.clone(),
    )
    .expect("fixture definition validates");

    TestHarness {
        engine,
        inference,
        retrieval,
        registry,
        store,
    }
}

/// A happy-path harness over the canonical two-branch topology.
#[must_use]
pub fn parallel_harness() -> TestHarness {
    harness(parallel_definition())
}

/// A happy-path harness over the combined retrieve-and-generate topology.
#[must_use]
pub fn combined_harness() -> TestHarness {
    harness(combined_definition())
}
