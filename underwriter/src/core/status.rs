//! Execution status and stage kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A blocking call to the inference collaborator.
    InferenceCall,
    /// A lookup against the vehicle-registry collaborator.
    ExternalLookup,
    /// A pure, local computation over already-resolved context values.
    DataTransform,
    /// A query against the knowledge-corpus collaborator.
    Retrieval,
    /// The fan-in step of a parallel node, consuming all branch outputs.
    Merge,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InferenceCall => write!(f, "inference_call"),
            Self::ExternalLookup => write!(f, "external_lookup"),
            Self::DataTransform => write!(f, "data_transform"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// The status of one pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// The execution is in flight.
    Running,
    /// The execution reached its terminal decision.
    Succeeded,
    /// The execution failed permanently.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
