//! Branch coordination: fan-out into independent stage sequences, fan-in
//! through a merge stage.
//!
//! Every branch runs on its own task against an isolated fork of the shared
//! context. The coordinator always joins all branches before reporting
//! anything; a failed branch does not abort its siblings unless sibling
//! cancellation is enabled, and even then cancellation is best-effort (an
//! in-flight collaborator call is not interrupted, the branch stops at its
//! next stage boundary).

use crate::context::ExecutionContext;
use crate::definition::StageDefinition;
use crate::errors::{ExecutionError, StageError};
use crate::executor::StageExecutor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct BranchOutcome {
    index: usize,
    ctx: ExecutionContext,
    failure: Option<(String, StageError)>,
    cancelled: bool,
}

pub(crate) async fn run_parallel(
    executor: &Arc<StageExecutor>,
    branches: &[Vec<StageDefinition>],
    merge: &StageDefinition,
    ctx: &ExecutionContext,
    execution_id: Uuid,
    cancel_siblings: bool,
) -> Result<(), ExecutionError> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(branches.len());

    for (index, branch) in branches.iter().enumerate() {
        let executor = executor.clone();
        let stages = branch.clone();
        let fork = ctx.fork();
        let flag = cancelled.clone();

        handles.push(tokio::spawn(async move {
            let mut outcome = BranchOutcome {
                index,
                ctx: fork,
                failure: None,
                cancelled: false,
            };

            for stage in &stages {
                if cancel_siblings && flag.load(Ordering::SeqCst) {
                    tracing::debug!(
                        execution = %execution_id,
                        branch = index,
                        stage = %stage.name,
                        "branch stopped after sibling failure"
                    );
                    outcome.cancelled = true;
                    break;
                }

                if let Err(error) = executor.execute(stage, &outcome.ctx, execution_id).await {
                    if cancel_siblings {
                        flag.store(true, Ordering::SeqCst);
                    }
                    outcome.failure = Some((stage.name.clone(), error));
                    break;
                }
            }

            outcome
        }));
    }

    // Fan-in: every branch terminates (success, failure, or stop) before the
    // node reports, so a fast failure never orphans a sibling's external
    // calls.
    let mut outcomes = Vec::with_capacity(handles.len());
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                return Err(ExecutionError::StageFailed {
                    state: "Parallel".to_string(),
                    source: StageError::validation(
                        "Parallel",
                        format!("branch task failed to join: {join_error}"),
                    ),
                });
            }
        }
    }
    outcomes.sort_by_key(|outcome| outcome.index);

    if let Some(outcome) = outcomes.iter_mut().find(|o| o.failure.is_some()) {
        let (state, source) = outcome.failure.take().unwrap_or_else(|| {
            ("Parallel".to_string(), StageError::validation("Parallel", "unreachable"))
        });
        return Err(ExecutionError::StageFailed { state, source });
    }

    for outcome in &outcomes {
        ctx.merge_from(&outcome.ctx)?;
    }

    executor
        .execute(merge, ctx, execution_id)
        .await
        .map_err(|source| ExecutionError::StageFailed {
            state: merge.name.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryArtifactStore;
    use crate::config::EngineConfig;
    use crate::core::StageKind;
    use crate::testing::{MockInferenceClient, MockRegistryClient, MockRetrievalClient};
    use std::time::Duration;

    fn executor() -> (Arc<StageExecutor>, Arc<MockRetrievalClient>) {
        let retrieval = Arc::new(MockRetrievalClient::new());
        let executor = Arc::new(StageExecutor::new(
            Arc::new(EngineConfig::default()),
            Arc::new(MockInferenceClient::new()),
            retrieval.clone(),
            Arc::new(MockRegistryClient::new()),
            Arc::new(MemoryArtifactStore::new()),
        ));
        (executor, retrieval)
    }

    fn retrieval_stage(name: &str, output: &str) -> StageDefinition {
        StageDefinition {
            name: name.to_string(),
            kind: StageKind::Retrieval,
            inputs: vec![],
            output: Some(output.to_string()),
            target: None,
            transform: None,
            query: None,
        }
    }

    fn merge_stage(inputs: &[&str]) -> StageDefinition {
        StageDefinition {
            name: "MergeBranches".to_string(),
            kind: StageKind::Merge,
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            output: None,
            target: None,
            transform: None,
            query: None,
        }
    }

    #[tokio::test]
    async fn test_both_branch_outputs_merge() {
        let (executor, _) = executor();
        let ctx = ExecutionContext::new();

        let branches = vec![
            vec![retrieval_stage("A", "outA")],
            vec![retrieval_stage("B", "outB")],
        ];
        let merge = merge_stage(&["outA", "outB"]);

        run_parallel(&executor, &branches, &merge, &ctx, Uuid::new_v4(), false)
            .await
            .unwrap();

        assert!(ctx.contains("outA"));
        assert!(ctx.contains("outB"));
    }

    #[tokio::test]
    async fn test_fan_in_waits_for_slow_branch() {
        let (executor, retrieval) = executor();
        retrieval.set_delay(Duration::from_millis(50));
        let ctx = ExecutionContext::new();

        let branches = vec![
            vec![retrieval_stage("Fast", "fast")],
            vec![
                retrieval_stage("SlowOne", "slow1"),
                retrieval_stage("SlowTwo", "slow2"),
            ],
        ];
        let merge = merge_stage(&["fast", "slow1", "slow2"]);

        run_parallel(&executor, &branches, &merge, &ctx, Uuid::new_v4(), false)
            .await
            .unwrap();

        // All three outputs are present: the node did not report until the
        // slower branch finished both its stages.
        assert!(ctx.contains("fast"));
        assert!(ctx.contains("slow2"));
        assert_eq!(retrieval.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_branch_does_not_cancel_sibling_by_default() {
        let (executor, retrieval) = executor();
        retrieval.set_delay(Duration::from_millis(30));
        let ctx = ExecutionContext::new();

        // Branch A fails immediately on a missing input; branch B still
        // completes its retrieval before the aggregate failure is reported.
        let failing = StageDefinition {
            name: "Broken".to_string(),
            kind: StageKind::Retrieval,
            inputs: vec!["never_written".to_string()],
            output: Some("neverOut".to_string()),
            target: None,
            transform: None,
            query: None,
        };
        let branches = vec![vec![failing], vec![retrieval_stage("B", "outB")]];
        let merge = merge_stage(&["outB"]);

        let err = run_parallel(&executor, &branches, &merge, &ctx, Uuid::new_v4(), false)
            .await
            .unwrap_err();

        assert_eq!(err.state(), Some("Broken"));
        assert_eq!(retrieval.call_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_collision_is_definition_error() {
        let (executor, _) = executor();
        let ctx = ExecutionContext::new();

        // Both branches write the same key. Load-time validation rejects
        // this topology; the coordinator enforces it at runtime too.
        let branches = vec![
            vec![retrieval_stage("A", "same")],
            vec![retrieval_stage("B", "same")],
        ];
        let merge = merge_stage(&["same"]);

        let err = run_parallel(&executor, &branches, &merge, &ctx, Uuid::new_v4(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Definition(_)));
    }
}
