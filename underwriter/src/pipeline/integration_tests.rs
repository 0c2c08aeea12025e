//! End-to-end tests driving the engine through the shipped topologies
//! against mock collaborators.

use crate::clients::{ArtifactStore, ClientError};
use crate::core::{ArtifactRef, ExecutionStatus};
use crate::errors::ExecutionError;
use crate::executor::RetryPolicy;
use crate::testing::fixtures;
use pretty_assertions::assert_eq;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_end_to_end_approval() {
    let h = fixtures::parallel_harness();

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Succeeded);
    assert_eq!(report.current_state, "Decide");
    assert_eq!(report.decision.as_deref(), Some("APPROVED"));
    assert!(report.error.is_none());

    // Branch A extracted the applicant and looked them up.
    assert_eq!(
        h.registry.last_lookup(),
        Some(("Jane Doe".to_string(), "D1234567".to_string()))
    );
    // Branch B retrieved once against the underwriting corpus.
    assert_eq!(h.retrieval.call_count(), 1);

    // The assembled prompt embeds the class, the record, and the guidance.
    let prompt_bytes = h
        .store
        .get(&ArtifactRef::namespaced(id, "final_prompt"))
        .await
        .unwrap();
    let prompt = String::from_utf8(prompt_bytes).unwrap();
    assert!(prompt.contains("drivers_license"));
    assert!(prompt.contains("license_status:valid"));
    assert!(prompt.contains("A full license in good standing qualifies"));

    // The terminal decision is persisted as an artifact.
    let decision = h
        .store
        .get(&ArtifactRef::namespaced(id, "decision"))
        .await
        .unwrap();
    assert_eq!(decision, b"APPROVED");

    assert!(h.engine.elapsed(id).unwrap() >= chrono::Duration::zero());
}

#[tokio::test]
async fn test_classify_timeout_exhausts_retries_and_fails() {
    let config = fixtures::test_config()
        .with_stage_timeout_ms(10)
        .with_retry(RetryPolicy::new().with_max_attempts(3).with_base_delay_ms(1).without_jitter());
    let h = fixtures::harness_with_config(fixtures::parallel_definition(), config);
    h.inference.set_delay(Duration::from_millis(100));

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.current_state, "Classify");
    assert!(report.error.unwrap().contains("deadline"));
    // Initial call plus two retries.
    assert_eq!(h.inference.call_count(), 3);
}

#[tokio::test]
async fn test_empty_registry_record_does_not_halt_the_pipeline() {
    let h = fixtures::parallel_harness();
    h.registry.set_record(None);

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Succeeded);

    let prompt_bytes = h
        .store
        .get(&ArtifactRef::namespaced(id, "final_prompt"))
        .await
        .unwrap();
    let prompt = String::from_utf8(prompt_bytes).unwrap();
    assert!(prompt.contains("<driver>\n\n</driver>"));
    assert!(prompt.contains("<rules>\n"));
}

#[tokio::test]
async fn test_branch_outputs_independent_of_relative_timing() {
    // Same initial context, opposite branch being the slow one: the
    // assembled prompt must come out identical.
    let slow_retrieval = fixtures::parallel_harness();
    slow_retrieval.retrieval.set_delay(Duration::from_millis(50));

    let slow_registry = fixtures::parallel_harness();
    slow_registry.registry.set_delay(Duration::from_millis(50));

    let id_a = slow_retrieval.engine.start("uploads/doc123.png");
    let id_b = slow_registry.engine.start("uploads/doc123.png");

    let report_a = slow_retrieval.engine.join(id_a).await.unwrap();
    let report_b = slow_registry.engine.join(id_b).await.unwrap();
    assert_eq!(report_a.status, ExecutionStatus::Succeeded);
    assert_eq!(report_b.status, ExecutionStatus::Succeeded);

    let prompt_a = slow_retrieval
        .store
        .get(&ArtifactRef::namespaced(id_a, "final_prompt"))
        .await
        .unwrap();
    let prompt_b = slow_registry
        .store
        .get(&ArtifactRef::namespaced(id_b, "final_prompt"))
        .await
        .unwrap();
    assert_eq!(prompt_a, prompt_b);
}

#[tokio::test]
async fn test_branch_failure_waits_for_sibling_then_reports() {
    let h = fixtures::parallel_harness();
    h.inference
        .set_error("model-extraction", ClientError::InvalidInput("unreadable".to_string()));
    h.retrieval.set_delay(Duration::from_millis(30));

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.current_state, "ExtractIdentity");
    // The sibling branch's retrieval still completed before the aggregate
    // failure was reported.
    assert_eq!(h.retrieval.call_count(), 1);
}

#[tokio::test]
async fn test_sibling_cancellation_is_opt_in() {
    let config = fixtures::test_config().with_cancel_siblings_on_failure(true);
    let h = fixtures::harness_with_config(fixtures::parallel_definition(), config);
    h.inference
        .set_error("model-extraction", ClientError::InvalidInput("unreadable".to_string()));
    h.retrieval.set_delay(Duration::from_millis(30));

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    // The failure still comes from the failing branch; the sibling stopped
    // at its next stage boundary at the earliest.
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.current_state, "ExtractIdentity");
}

#[tokio::test]
async fn test_combined_topology_runs_end_to_end() {
    let h = fixtures::combined_harness();

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Succeeded);
    assert_eq!(report.current_state, "RetrieveAndDecide");
    assert_eq!(report.decision.as_deref(), Some("APPROVED"));

    // One retrieval and one generation inside the combined stage.
    assert_eq!(h.retrieval.call_count(), 1);
    assert_eq!(h.inference.calls_for("model-retrieve-and-generate"), 1);
    // No separate prompt-assembly stage in this topology.
    assert!(h
        .store
        .get(&ArtifactRef::namespaced(id, "final_prompt"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_artifacts_survive_a_late_failure() {
    let h = fixtures::parallel_harness();
    h.inference
        .set_error("model-decision", ClientError::InvalidInput("rejected".to_string()));

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.current_state, "Decide");

    // Artifacts written before the failure are retained for diagnostics.
    let artifacts = h.store.artifacts_for(&format!("executions/{id}/"));
    let keys: Vec<&str> = artifacts.iter().map(|a| a.key.as_str()).collect();
    assert!(keys.iter().any(|k| k.ends_with("encoded_document")));
    assert!(keys.iter().any(|k| k.ends_with("final_prompt")));
}

#[tokio::test]
async fn test_execution_deadline_fails_the_run() {
    let config = fixtures::test_config().with_execution_timeout_ms(20);
    let h = fixtures::harness_with_config(fixtures::parallel_definition(), config);
    h.retrieval.set_delay(Duration::from_millis(200));

    let id = h.engine.start("uploads/doc123.png");
    let report = h.engine.join(id).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.error.unwrap().contains("deadline"));
}

#[tokio::test]
async fn test_concurrent_executions_do_not_share_state() {
    let h = fixtures::parallel_harness();
    h.store.seed("uploads/doc456.png", b"other-image".to_vec());

    let first = h.engine.start("uploads/doc123.png");
    let second = h.engine.start("uploads/doc456.png");

    let report_first = h.engine.join(first).await.unwrap();
    let report_second = h.engine.join(second).await.unwrap();

    assert_eq!(report_first.status, ExecutionStatus::Succeeded);
    assert_eq!(report_second.status, ExecutionStatus::Succeeded);

    // Each execution wrote its artifacts under its own namespace.
    assert!(!h.store.artifacts_for(&format!("executions/{first}/")).is_empty());
    assert!(!h.store.artifacts_for(&format!("executions/{second}/")).is_empty());
}

#[tokio::test]
async fn test_status_for_unknown_execution() {
    let h = fixtures::parallel_harness();
    let err = h.engine.status(Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, ExecutionError::UnknownExecution(_)));
}
