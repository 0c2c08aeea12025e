//! The pipeline state machine.
//!
//! The engine interprets a validated [`PipelineDefinition`]: sequential
//! stages run strictly in order, parallel nodes delegate to the branch
//! coordinator, and the execution's current-state marker advances only once
//! a stage has written its output into context. One engine serves any number
//! of concurrent executions; they share nothing but the read-only definition
//! and the append-only artifact store.

use super::parallel::run_parallel;
use crate::clients::{ArtifactStore, InferenceClient, RegistryClient, RetrievalClient};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::core::{ArtifactRef, ContextValue, ExecutionStatus};
use crate::definition::{Node, PipelineDefinition};
use crate::errors::{DefinitionError, ExecutionError};
use crate::executor::StageExecutor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A point-in-time view of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The execution status.
    pub status: ExecutionStatus,
    /// The state the execution is in, or was in when it terminated.
    pub current_state: String,
    /// Error detail for failed executions.
    pub error: Option<String>,
    /// The terminal decision, once the execution succeeds.
    pub decision: Option<String>,
}

#[derive(Debug)]
struct ExecutionRecord {
    status: ExecutionStatus,
    current_state: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    decision: Option<String>,
}

/// Interprets a pipeline definition over the configured collaborators.
pub struct PipelineEngine {
    definition: Arc<PipelineDefinition>,
    config: Arc<EngineConfig>,
    executor: Arc<StageExecutor>,
    executions: DashMap<Uuid, ExecutionRecord>,
    handles: DashMap<Uuid, tokio::task::JoinHandle<()>>,
}

impl PipelineEngine {
    /// Builds an engine, validating the definition against the configuration
    /// before anything can run.
    pub fn new(
        definition: PipelineDefinition,
        config: EngineConfig,
        inference: Arc<dyn InferenceClient>,
        retrieval: Arc<dyn RetrievalClient>,
        registry: Arc<dyn RegistryClient>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Arc<Self>, DefinitionError> {
        definition.validate(&config)?;

        let config = Arc::new(config);
        let executor = Arc::new(StageExecutor::new(
            config.clone(),
            inference,
            retrieval,
            registry,
            store,
        ));

        Ok(Arc::new(Self {
            definition: Arc::new(definition),
            config,
            executor,
            executions: DashMap::new(),
            handles: DashMap::new(),
        }))
    }

    /// The loaded definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts one execution for an uploaded document and returns its id.
    /// The run proceeds on its own task; poll with [`Self::status`] or wait
    /// with [`Self::join`].
    pub fn start(self: &Arc<Self>, document_ref: impl Into<String>) -> Uuid {
        let document_ref = document_ref.into();
        let id = Uuid::new_v4();

        self.executions.insert(
            id,
            ExecutionRecord {
                status: ExecutionStatus::Running,
                current_state: self.first_state(),
                started_at: Utc::now(),
                finished_at: None,
                error: None,
                decision: None,
            },
        );

        tracing::info!(
            execution = %id,
            pipeline = %self.definition.name,
            document = %document_ref,
            "execution.started"
        );

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.drive(id, document_ref).await;
        });
        self.handles.insert(id, handle);

        id
    }

    /// Reports the status of an execution.
    pub fn status(&self, id: Uuid) -> Result<ExecutionReport, ExecutionError> {
        self.executions
            .get(&id)
            .map(|record| ExecutionReport {
                status: record.status,
                current_state: record.current_state.clone(),
                error: record.error.clone(),
                decision: record.decision.clone(),
            })
            .ok_or(ExecutionError::UnknownExecution(id))
    }

    /// Waits for a started execution to reach a terminal state and returns
    /// its final report.
    pub async fn join(&self, id: Uuid) -> Result<ExecutionReport, ExecutionError> {
        if let Some((_, handle)) = self.handles.remove(&id) {
            if let Err(join_error) = handle.await {
                tracing::error!(execution = %id, error = %join_error, "execution task lost");
            }
        }
        self.status(id)
    }

    /// How long an execution has been running, or ran.
    pub fn elapsed(&self, id: Uuid) -> Result<chrono::Duration, ExecutionError> {
        self.executions
            .get(&id)
            .map(|record| {
                record.finished_at.unwrap_or_else(Utc::now) - record.started_at
            })
            .ok_or(ExecutionError::UnknownExecution(id))
    }

    fn first_state(&self) -> String {
        match self.definition.nodes.first() {
            Some(Node::Stage { stage }) => stage.name.clone(),
            Some(Node::Parallel { .. }) => "Parallel".to_string(),
            None => String::new(),
        }
    }

    /// Runs the execution under the whole-run deadline and records the
    /// terminal outcome. Artifacts written before a failure stay in the
    /// store for diagnostics; nothing rolls back.
    async fn drive(&self, id: Uuid, document_ref: String) {
        let outcome = tokio::time::timeout(
            self.config.execution_timeout(),
            self.run(id, document_ref),
        )
        .await;

        let Some(mut record) = self.executions.get_mut(&id) else {
            return;
        };
        record.finished_at = Some(Utc::now());

        match outcome {
            Ok(Ok(decision)) => {
                record.status = ExecutionStatus::Succeeded;
                record.decision = decision;
                tracing::info!(
                    execution = %id,
                    state = %record.current_state,
                    decision = record.decision.as_deref().unwrap_or(""),
                    "execution.succeeded"
                );
            }
            Ok(Err(error)) => {
                if let Some(state) = error.state() {
                    record.current_state = state.to_string();
                }
                record.status = ExecutionStatus::Failed;
                record.error = Some(error.to_string());
                tracing::warn!(
                    execution = %id,
                    state = %record.current_state,
                    error = %error,
                    "execution.failed"
                );
            }
            Err(_) => {
                record.status = ExecutionStatus::Failed;
                record.error = Some(ExecutionError::Timeout.to_string());
                tracing::warn!(
                    execution = %id,
                    state = %record.current_state,
                    "execution.deadline_exceeded"
                );
            }
        }
    }

    async fn run(&self, id: Uuid, document_ref: String) -> Result<Option<String>, ExecutionError> {
        let ctx = ExecutionContext::new();
        let initial_key = self
            .definition
            .initial_keys
            .first()
            .ok_or(DefinitionError::Empty)?;
        ctx.insert(initial_key.clone(), ContextValue::text(document_ref))
            .map_err(ExecutionError::from)?;

        for node in &self.definition.nodes {
            match node {
                Node::Stage { stage } => {
                    self.set_state(id, &stage.name);
                    self.executor
                        .execute(stage, &ctx, id)
                        .await
                        .map_err(|source| ExecutionError::StageFailed {
                            state: stage.name.clone(),
                            source,
                        })?;
                }
                Node::Parallel { branches, merge } => {
                    self.set_state(id, "Parallel");
                    run_parallel(
                        &self.executor,
                        branches,
                        merge,
                        &ctx,
                        id,
                        self.config.cancel_siblings_on_failure,
                    )
                    .await?;
                }
            }
        }

        Ok(self.persist_decision(id, &ctx).await)
    }

    /// Persists the last stage's output as the terminal decision artifact
    /// and returns its rendered form for the status report.
    async fn persist_decision(&self, id: Uuid, ctx: &ExecutionContext) -> Option<String> {
        let final_output = match self.definition.nodes.last() {
            Some(Node::Stage { stage }) => stage.output.as_deref(),
            _ => None,
        }?;
        let value = ctx.get(final_output)?;

        let rendered = match &value {
            ContextValue::Inline(serde_json::Value::String(text)) => text.clone(),
            ContextValue::Inline(other) => other.to_string(),
            // Already persisted by the producing stage.
            ContextValue::Reference(reference) => return Some(reference.key.clone()),
        };

        let key = ArtifactRef::namespaced(id, "decision").key;
        if let Err(error) = self
            .executor
            .store()
            .put(&key, rendered.clone().into_bytes())
            .await
        {
            tracing::warn!(execution = %id, error = %error, "failed to persist decision artifact");
        }

        Some(rendered)
    }

    fn set_state(&self, id: Uuid, state: &str) {
        if let Some(mut record) = self.executions.get_mut(&id) {
            record.current_state = state.to_string();
        }
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("pipeline", &self.definition.name)
            .field("executions", &self.executions.len())
            .finish_non_exhaustive()
    }
}
