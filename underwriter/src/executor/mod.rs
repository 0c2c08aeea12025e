//! Stage execution.
//!
//! The executor runs one unit of work: an inference call, an external
//! lookup, a retrieval, or a local data transform. It resolves the stage's
//! declared inputs from context before issuing any external call, applies
//! the per-call timeout and retry policy, and writes the stage's output
//! under its declared context key.

mod retry;

pub use retry::{with_retry, RetryPolicy};

use crate::clients::{
    ArtifactStore, ClientError, InferenceClient, ModelInput, ModelOutput, Passage, RegistryClient,
    RetrievalClient,
};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::core::{ArtifactRef, ContextValue, StageKind};
use crate::definition::{StageDefinition, TransformOp};
use crate::errors::{DefinitionError, StageError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Executes individual stages against the configured collaborators.
pub struct StageExecutor {
    config: Arc<EngineConfig>,
    inference: Arc<dyn InferenceClient>,
    retrieval: Arc<dyn RetrievalClient>,
    registry: Arc<dyn RegistryClient>,
    store: Arc<dyn ArtifactStore>,
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        inference: Arc<dyn InferenceClient>,
        retrieval: Arc<dyn RetrievalClient>,
        registry: Arc<dyn RegistryClient>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            inference,
            retrieval,
            registry,
            store,
        }
    }

    /// The artifact store this executor writes through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Executes one stage, reading its inputs from and writing its output to
    /// the given context.
    pub async fn execute(
        &self,
        stage: &StageDefinition,
        ctx: &ExecutionContext,
        execution_id: Uuid,
    ) -> Result<(), StageError> {
        // Inputs resolve before any external call; a missing key fails fast.
        let mut inputs: Vec<(String, ContextValue)> = Vec::with_capacity(stage.inputs.len());
        for key in &stage.inputs {
            inputs.push((key.clone(), ctx.require(&stage.name, key)?));
        }

        let started = Instant::now();
        let result = match stage.kind {
            StageKind::InferenceCall => self.run_inference(stage, &inputs, ctx).await,
            StageKind::ExternalLookup => self.run_lookup(stage, &inputs, ctx).await,
            StageKind::Retrieval => self.run_retrieval(stage, ctx).await,
            StageKind::DataTransform => self.run_transform(stage, &inputs, ctx, execution_id).await,
            // Inputs are verified above; folding branch contexts together is
            // the branch coordinator's job.
            StageKind::Merge => Ok(()),
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(()) => {
                tracing::info!(
                    execution = %execution_id,
                    stage = %stage.name,
                    kind = %stage.kind,
                    duration_ms,
                    "stage.completed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    execution = %execution_id,
                    stage = %stage.name,
                    kind = %stage.kind,
                    duration_ms,
                    error = %error,
                    "stage.failed"
                );
            }
        }

        result
    }

    async fn run_inference(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        ctx: &ExecutionContext,
    ) -> Result<(), StageError> {
        let target = stage
            .target
            .as_deref()
            .ok_or_else(|| missing_field(stage, "target"))?;
        let model_id = self
            .config
            .models
            .resolve(target)
            .ok_or_else(|| {
                StageError::from(DefinitionError::UnknownTarget {
                    stage: stage.name.clone(),
                    target: target.to_string(),
                })
            })?
            .to_string();

        let output = if let Some(query) = &stage.query {
            // Combined retrieve-and-generate: one stage performs the corpus
            // retrieval and feeds the passages straight into the model.
            let passages = self.call_retrieval(&stage.name, query).await?;
            let guidance = combine_passages(&passages);

            let mut prompt = query.clone();
            for (key, value) in inputs {
                let rendered = render_value(value);
                prompt.push_str(&format!("\n<{key}>\n{rendered}\n</{key}>"));
            }
            prompt.push_str(&format!("\n<rules>\n{guidance}\n</rules>"));

            self.call_model(&stage.name, &model_id, &ModelInput::Text(prompt))
                .await?
        } else {
            let input = self.model_input(stage, inputs, target)?;
            self.call_model(&stage.name, &model_id, &input).await?
        };

        write_output(stage, ctx, output_value(output))
    }

    /// Builds the model input from the stage's first bound value: stored
    /// payloads go by reference, inline text goes as a prompt.
    fn model_input(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        target: &str,
    ) -> Result<ModelInput, StageError> {
        let (key, value) = inputs.first().ok_or_else(|| {
            StageError::validation(&stage.name, "inference stage has no input binding")
        })?;

        let instruction = match target {
            "classification" => Some(self.config.prompts.classification.clone()),
            "extraction" => Some(self.config.prompts.extract_identity.clone()),
            _ => None,
        };

        match value {
            ContextValue::Reference(source) => Ok(ModelInput::Source {
                source: source.clone(),
                prompt: instruction,
            }),
            ContextValue::Inline(serde_json::Value::String(text)) => {
                Ok(ModelInput::Text(match instruction {
                    Some(instruction) => format!("{instruction}\n\n{text}"),
                    None => text.clone(),
                }))
            }
            ContextValue::Inline(_) => Err(StageError::validation(
                &stage.name,
                format!("context key '{key}' is not usable as model input"),
            )),
        }
    }

    async fn run_lookup(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        ctx: &ExecutionContext,
    ) -> Result<(), StageError> {
        let (_, identity) = inputs.first().ok_or_else(|| {
            StageError::validation(&stage.name, "lookup stage has no input binding")
        })?;
        let (name, license) = parse_identity(&stage.name, identity)?;

        let record = with_retry(&self.config.retry, &stage.name, || {
            let name = name.clone();
            let license = license.clone();
            async move {
                match tokio::time::timeout(
                    self.config.stage_timeout(),
                    self.registry.lookup(&name, &license),
                )
                .await
                {
                    Ok(Ok(record)) => Ok(record),
                    Ok(Err(error)) => Err(map_client_error(&stage.name, &error)),
                    Err(_) => Err(deadline_error(&stage.name, self.config.stage_timeout_ms)),
                }
            }
        })
        .await?;

        // "No record found" is a valid result: an empty record flows
        // downstream as content, not as an error.
        let value = match record {
            Some(record) => ContextValue::json(serde_json::to_value(record).map_err(|e| {
                StageError::validation(&stage.name, format!("unserializable registry record: {e}"))
            })?),
            None => ContextValue::json(serde_json::json!({})),
        };
        write_output(stage, ctx, value)
    }

    async fn run_retrieval(
        &self,
        stage: &StageDefinition,
        ctx: &ExecutionContext,
    ) -> Result<(), StageError> {
        let query = stage
            .query
            .clone()
            .unwrap_or_else(|| self.config.retrieval_query.clone());

        let passages = self.call_retrieval(&stage.name, &query).await?;
        let value = ContextValue::json(serde_json::to_value(passages).map_err(|e| {
            StageError::validation(&stage.name, format!("unserializable passages: {e}"))
        })?);
        write_output(stage, ctx, value)
    }

    async fn run_transform(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        ctx: &ExecutionContext,
        execution_id: Uuid,
    ) -> Result<(), StageError> {
        let op = stage
            .transform
            .ok_or_else(|| missing_field(stage, "transform"))?;

        match op {
            TransformOp::Encode => self.encode_document(stage, inputs, ctx, execution_id).await,
            TransformOp::Combine => {
                let (key, passages) = inputs.first().ok_or_else(|| {
                    StageError::validation(&stage.name, "combine transform has no input binding")
                })?;
                let passages: Vec<Passage> =
                    serde_json::from_value(passages.expect_json(&stage.name, key)?.clone())
                        .map_err(|e| {
                            StageError::validation(
                                &stage.name,
                                format!("context key '{key}' is not a passage list: {e}"),
                            )
                        })?;
                write_output(stage, ctx, ContextValue::text(combine_passages(&passages)))
            }
            TransformOp::FinalPrompt => {
                self.generate_final_prompt(stage, inputs, ctx, execution_id)
                    .await
            }
        }
    }

    /// Fetches the uploaded document and persists a base64 rendition the
    /// inference collaborator consumes without further transformation.
    async fn encode_document(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        ctx: &ExecutionContext,
        execution_id: Uuid,
    ) -> Result<(), StageError> {
        let (key, value) = inputs.first().ok_or_else(|| {
            StageError::validation(&stage.name, "encode transform has no input binding")
        })?;

        let source = match value {
            ContextValue::Reference(reference) => reference.clone(),
            ContextValue::Inline(serde_json::Value::String(object_key)) => {
                ArtifactRef::new(object_key.clone())
            }
            ContextValue::Inline(_) => {
                return Err(StageError::validation(
                    &stage.name,
                    format!("context key '{key}' does not name a stored document"),
                ));
            }
        };

        // A missing or unreadable upload is malformed input, fatal for the
        // stage; transforms do not retry.
        let bytes = self
            .store
            .get(&source)
            .await
            .map_err(|e| StageError::validation(&stage.name, e.to_string()))?;
        let encoded = BASE64.encode(bytes);

        let reference = self
            .store
            .put(
                &ArtifactRef::namespaced(execution_id, "encoded_document").key,
                encoded.into_bytes(),
            )
            .await
            .map_err(|e| StageError::validation(&stage.name, e.to_string()))?;

        write_output(stage, ctx, ContextValue::reference(reference))
    }

    /// Assembles the determination prompt from the document class, the
    /// registry record, and the manual guidance. Produces a well-formed
    /// prompt even when the registry record is empty.
    async fn generate_final_prompt(
        &self,
        stage: &StageDefinition,
        inputs: &[(String, ContextValue)],
        ctx: &ExecutionContext,
        execution_id: Uuid,
    ) -> Result<(), StageError> {
        let [(class_key, class), (record_key, record), (guidance_key, guidance)] = inputs else {
            return Err(StageError::validation(
                &stage.name,
                "final_prompt transform requires exactly three inputs: \
                 document class, registry record, manual guidance",
            ));
        };

        let document_class = class.expect_str(&stage.name, class_key)?;
        let record = record.expect_json(&stage.name, record_key)?;
        let guidance = guidance.expect_str(&stage.name, guidance_key)?;
        let driver_info = render_driver(&stage.name, record)?;

        let prompt = self
            .config
            .prompts
            .validation
            .replace(
                "\n<document>\n</document>",
                &format!("\n<document>\n{document_class}\n</document>"),
            )
            .replace(
                "\n<driver>\n</driver>",
                &format!("\n<driver>\n{driver_info}\n</driver>"),
            )
            .replace(
                "\n<rules>\n</rules>",
                &format!("\n<rules>\n{guidance}\n</rules>"),
            );

        let reference = self
            .store
            .put(
                &ArtifactRef::namespaced(execution_id, "final_prompt").key,
                prompt.into_bytes(),
            )
            .await
            .map_err(|e| StageError::validation(&stage.name, e.to_string()))?;

        write_output(stage, ctx, ContextValue::reference(reference))
    }

    async fn call_model(
        &self,
        stage: &str,
        model_id: &str,
        input: &ModelInput,
    ) -> Result<ModelOutput, StageError> {
        with_retry(&self.config.retry, stage, || {
            let input = input.clone();
            async move {
                match tokio::time::timeout(
                    self.config.stage_timeout(),
                    self.inference.invoke_model(model_id, input),
                )
                .await
                {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(error)) => Err(map_client_error(stage, &error)),
                    Err(_) => Err(deadline_error(stage, self.config.stage_timeout_ms)),
                }
            }
        })
        .await
    }

    async fn call_retrieval(&self, stage: &str, query: &str) -> Result<Vec<Passage>, StageError> {
        with_retry(&self.config.retry, stage, || async move {
            match tokio::time::timeout(
                self.config.stage_timeout(),
                self.retrieval.retrieve(&self.config.corpus_id, query),
            )
            .await
            {
                Ok(Ok(passages)) => Ok(passages),
                Ok(Err(error)) => Err(map_client_error(stage, &error)),
                Err(_) => Err(deadline_error(stage, self.config.stage_timeout_ms)),
            }
        })
        .await
    }
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("corpus_id", &self.config.corpus_id)
            .finish_non_exhaustive()
    }
}

fn write_output(
    stage: &StageDefinition,
    ctx: &ExecutionContext,
    value: ContextValue,
) -> Result<(), StageError> {
    let output = stage
        .output
        .as_deref()
        .ok_or_else(|| missing_field(stage, "output"))?;
    ctx.insert(output, value).map_err(StageError::from)
}

fn missing_field(stage: &StageDefinition, field: &str) -> StageError {
    StageError::from(DefinitionError::MissingField {
        stage: stage.name.clone(),
        kind: stage.kind.to_string(),
        field: field.to_string(),
    })
}

fn map_client_error(stage: &str, error: &ClientError) -> StageError {
    if error.is_transient() {
        StageError::retryable(stage, error.to_string())
    } else {
        StageError::validation(stage, error.to_string())
    }
}

fn deadline_error(stage: &str, timeout_ms: u64) -> StageError {
    StageError::retryable(stage, format!("call exceeded {timeout_ms}ms deadline"))
}

fn output_value(output: ModelOutput) -> ContextValue {
    match output.fields {
        Some(fields) => ContextValue::json(fields),
        None => ContextValue::text(output.text.trim()),
    }
}

/// Renders a context value for embedding into a text prompt.
fn render_value(value: &ContextValue) -> String {
    match value {
        ContextValue::Inline(serde_json::Value::String(text)) => text.clone(),
        ContextValue::Inline(other) => other.to_string(),
        ContextValue::Reference(reference) => reference.key.clone(),
    }
}

/// Concatenates passage texts into one guidance string.
fn combine_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders a registry record as `key:value` pairs for the `<driver>` slot.
/// An empty record renders as an empty string.
fn render_driver(stage: &str, record: &serde_json::Value) -> Result<String, StageError> {
    let object = record.as_object().ok_or_else(|| {
        StageError::validation(stage, "registry record is not an object")
    })?;

    let mut keys: Vec<&String> = object.keys().collect();
    keys.sort();

    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let rendered = match &object[key.as_str()] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map_or_else(|| item.to_string(), String::from))
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        };
        parts.push(format!("{key}:{rendered}"));
    }
    Ok(parts.join(","))
}

/// Pulls the applicant name and license number out of an extracted identity,
/// which arrives either as structured fields or as `name: ..., license: ...`
/// text from the extraction model.
fn parse_identity(stage: &str, value: &ContextValue) -> Result<(String, String), StageError> {
    if let Some(object) = value.as_json().and_then(serde_json::Value::as_object) {
        if let (Some(name), Some(license)) = (
            object.get("name").and_then(serde_json::Value::as_str),
            object.get("license").and_then(serde_json::Value::as_str),
        ) {
            return Ok((name.to_string(), license.to_string()));
        }
    }

    if let Some(text) = value.as_str() {
        let mut name = None;
        let mut license = None;
        for part in text.split(',') {
            if let Some((key, val)) = part.split_once(':') {
                match key.trim() {
                    "name" => name = Some(val.trim().to_string()),
                    "license" => license = Some(val.trim().to_string()),
                    _ => {}
                }
            }
        }
        if let (Some(name), Some(license)) = (name, license) {
            return Ok((name, license));
        }
    }

    Err(StageError::validation(
        stage,
        "could not parse applicant name and license from extracted identity",
    ))
}
