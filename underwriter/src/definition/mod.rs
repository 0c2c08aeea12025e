//! Declarative pipeline definitions.
//!
//! The set of stages, the branch topology, and the context-key wiring are
//! data, loaded from a versioned JSON descriptor at process start and treated
//! as read-only for the process lifetime. Changing the topology means
//! shipping a new descriptor, not new code: the canonical two-branch flow and
//! the earlier combined retrieve-and-generate flow are both expressed as
//! definition files against the same interpreter.

use crate::config::EngineConfig;
use crate::core::StageKind;
use crate::errors::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The local computation a `data_transform` stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    /// Fetch the uploaded document and base64-encode it.
    Encode,
    /// Concatenate retrieved passages into one guidance text.
    Combine,
    /// Assemble the final determination prompt.
    FinalPrompt,
}

/// Static descriptor for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage name; doubles as the state name in status reports.
    pub name: String,
    /// The kind of work the stage performs.
    pub kind: StageKind,
    /// Context keys the stage reads. Must all be produced upstream.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Context key the stage writes. Required for every kind except merge.
    #[serde(default)]
    pub output: Option<String>,
    /// Endpoint alias for inference stages, resolved through the model
    /// catalog.
    #[serde(default)]
    pub target: Option<String>,
    /// Transform discriminator for `data_transform` stages.
    #[serde(default)]
    pub transform: Option<TransformOp>,
    /// Query text for retrieval stages, or for an inference stage that
    /// performs retrieval and generation in one call. Retrieval stages fall
    /// back to the configured underwriting query when absent.
    #[serde(default)]
    pub query: Option<String>,
}

/// One node in the pipeline's top-level sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// A single sequential stage.
    Stage {
        /// The stage descriptor.
        stage: StageDefinition,
    },
    /// Fan-out into independent branches, fan-in through a merge stage.
    Parallel {
        /// The branch stage sequences, each executed in order.
        branches: Vec<Vec<StageDefinition>>,
        /// The merge stage consuming all branch outputs.
        merge: StageDefinition,
    },
}

/// A complete, versioned pipeline descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// The pipeline name.
    pub name: String,
    /// Context keys present before the first stage runs. The trigger binds
    /// the uploaded document's location to the first of these.
    pub initial_keys: Vec<String>,
    /// The top-level node sequence.
    pub nodes: Vec<Node>,
}

impl PipelineDefinition {
    /// Parses a definition from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse {
            detail: e.to_string(),
        })
    }

    /// Loads a definition from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| DefinitionError::Parse {
            detail: format!("{}: {e}", path.as_ref().display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Iterates every stage in the definition, branches and merges included.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.nodes.iter().flat_map(|node| {
            let stages: Vec<&StageDefinition> = match node {
                Node::Stage { stage } => vec![stage],
                Node::Parallel { branches, merge } => branches
                    .iter()
                    .flatten()
                    .chain(std::iter::once(merge))
                    .collect(),
            };
            stages
        })
    }

    /// Validates the definition against a configuration.
    ///
    /// Simulates the data flow from the initial keys forward, so a stage
    /// whose declared inputs are never produced upstream, an output-key
    /// collision (including across sibling branches), or an unresolvable
    /// endpoint alias all fail here, before any execution starts.
    pub fn validate(&self, config: &EngineConfig) -> Result<(), DefinitionError> {
        if self.nodes.is_empty() {
            return Err(DefinitionError::Empty);
        }
        if self.initial_keys.is_empty() {
            return Err(DefinitionError::MissingField {
                stage: self.name.clone(),
                kind: "pipeline".to_string(),
                field: "initial_keys".to_string(),
            });
        }

        let mut available: HashSet<String> = self.initial_keys.iter().cloned().collect();
        let mut names: HashSet<String> = HashSet::new();

        for node in &self.nodes {
            match node {
                Node::Stage { stage } => {
                    if stage.kind == StageKind::Merge {
                        return Err(DefinitionError::MisplacedMerge {
                            stage: stage.name.clone(),
                        });
                    }
                    validate_stage(stage, config, &mut available, &mut names)?;
                }
                Node::Parallel { branches, merge } => {
                    if branches.len() < 2 {
                        return Err(DefinitionError::TooFewBranches {
                            found: branches.len(),
                        });
                    }

                    let mut merged_new: HashSet<String> = HashSet::new();
                    for branch in branches {
                        let mut branch_available = available.clone();
                        for stage in branch {
                            if stage.kind == StageKind::Merge {
                                return Err(DefinitionError::MisplacedMerge {
                                    stage: stage.name.clone(),
                                });
                            }
                            validate_stage(stage, config, &mut branch_available, &mut names)?;
                        }
                        for key in branch_available.difference(&available) {
                            if !merged_new.insert(key.clone()) {
                                return Err(DefinitionError::KeyCollision { key: key.clone() });
                            }
                        }
                    }
                    available.extend(merged_new);

                    if merge.kind != StageKind::Merge {
                        return Err(DefinitionError::MissingField {
                            stage: merge.name.clone(),
                            kind: merge.kind.to_string(),
                            field: "kind=merge".to_string(),
                        });
                    }
                    if !names.insert(merge.name.clone()) {
                        return Err(DefinitionError::DuplicateStage {
                            stage: merge.name.clone(),
                        });
                    }
                    for key in &merge.inputs {
                        if !available.contains(key) {
                            return Err(DefinitionError::MissingKey {
                                stage: merge.name.clone(),
                                key: key.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_stage(
    stage: &StageDefinition,
    config: &EngineConfig,
    available: &mut HashSet<String>,
    names: &mut HashSet<String>,
) -> Result<(), DefinitionError> {
    if !names.insert(stage.name.clone()) {
        return Err(DefinitionError::DuplicateStage {
            stage: stage.name.clone(),
        });
    }

    for key in &stage.inputs {
        if !available.contains(key) {
            return Err(DefinitionError::MissingKey {
                stage: stage.name.clone(),
                key: key.clone(),
            });
        }
    }

    match stage.kind {
        StageKind::InferenceCall => {
            let target = stage.target.as_deref().ok_or_else(|| missing_field(stage, "target"))?;
            if config.models.resolve(target).is_none() {
                return Err(DefinitionError::UnknownTarget {
                    stage: stage.name.clone(),
                    target: target.to_string(),
                });
            }
        }
        StageKind::DataTransform => {
            if stage.transform.is_none() {
                return Err(missing_field(stage, "transform"));
            }
        }
        StageKind::ExternalLookup | StageKind::Retrieval | StageKind::Merge => {}
    }

    match &stage.output {
        Some(output) => {
            if !available.insert(output.clone()) {
                return Err(DefinitionError::KeyCollision { key: output.clone() });
            }
        }
        None if stage.kind != StageKind::Merge => {
            return Err(missing_field(stage, "output"));
        }
        None => {}
    }

    Ok(())
}

fn missing_field(stage: &StageDefinition, field: &str) -> DefinitionError {
    DefinitionError::MissingField {
        stage: stage.name.clone(),
        kind: stage.kind.to_string(),
        field: field.to_string(),
    }
}
