//! Error types for the underwriting pipeline.
//!
//! The taxonomy separates static descriptor problems (`DefinitionError`),
//! per-stage runtime failures (`StageError`), and terminal execution outcomes
//! (`ExecutionError`). An empty registry record or an empty passage list is
//! never an error anywhere in this crate; downstream stages branch on
//! content, not on the error channel.

use thiserror::Error;
use uuid::Uuid;

/// Error raised when a pipeline definition is invalid.
///
/// Definition errors are detected at load time or, at the latest, before any
/// external call is issued. They are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The definition contains no nodes.
    #[error("pipeline definition contains no stages")]
    Empty,

    /// A stage reads a context key that no upstream stage produces.
    #[error("stage '{stage}' reads context key '{key}' which is never produced upstream")]
    MissingKey {
        /// The stage declaring the input.
        stage: String,
        /// The missing context key.
        key: String,
    },

    /// Two stages declare the same output key.
    #[error("context key '{key}' is written by more than one stage")]
    KeyCollision {
        /// The conflicting context key.
        key: String,
    },

    /// A stage targets a model or service id that is not configured.
    #[error("stage '{stage}' targets unknown endpoint '{target}'")]
    UnknownTarget {
        /// The stage declaring the target.
        stage: String,
        /// The unresolved target id.
        target: String,
    },

    /// A stage is missing a field its kind requires.
    #[error("stage '{stage}' of kind '{kind}' is missing required field '{field}'")]
    MissingField {
        /// The stage name.
        stage: String,
        /// The stage kind.
        kind: String,
        /// The missing field.
        field: String,
    },

    /// Two stages share a name.
    #[error("duplicate stage name '{stage}'")]
    DuplicateStage {
        /// The repeated name.
        stage: String,
    },

    /// A parallel node declares fewer than two branches.
    #[error("parallel node requires at least two branches, found {found}")]
    TooFewBranches {
        /// The number of branches declared.
        found: usize,
    },

    /// A merge stage appears outside a parallel node's merge slot.
    #[error("stage '{stage}' of kind 'merge' may only appear as a parallel merge step")]
    MisplacedMerge {
        /// The misplaced stage.
        stage: String,
    },

    /// The definition file could not be parsed.
    #[error("failed to parse pipeline definition: {detail}")]
    Parse {
        /// Parser diagnostic.
        detail: String,
    },
}

/// Error raised by a single stage during execution.
#[derive(Debug, Error)]
pub enum StageError {
    /// A transient failure (timeout, throttling, transport) eligible for
    /// bounded backoff retry at the stage level.
    #[error("stage '{stage}': retryable failure: {detail}")]
    Retryable {
        /// The failing stage.
        stage: String,
        /// Failure detail.
        detail: String,
    },

    /// A malformed payload or unexpected shape. Fatal for the stage, never
    /// retried.
    #[error("stage '{stage}': invalid payload: {detail}")]
    Validation {
        /// The failing stage.
        stage: String,
        /// Failure detail.
        detail: String,
    },

    /// A declared input key was absent from context at execution time.
    #[error("stage '{stage}': required context key '{key}' is missing")]
    MissingInput {
        /// The stage declaring the input.
        stage: String,
        /// The absent key.
        key: String,
    },

    /// A definition error surfaced while executing (e.g. a context key
    /// collision at merge time).
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl StageError {
    /// Creates a retryable stage error.
    #[must_use]
    pub fn retryable(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Retryable {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Creates a validation stage error.
    #[must_use]
    pub fn validation(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Returns true if the error is eligible for retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Terminal failure of a pipeline execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A stage failed after exhausting any applicable retries. Carries the
    /// failing state's name for the status report.
    #[error("execution failed in state '{state}': {source}")]
    StageFailed {
        /// The state that was running when the execution failed.
        state: String,
        /// The underlying stage error.
        #[source]
        source: StageError,
    },

    /// The definition was rejected before or during the run.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// The execution-level deadline elapsed.
    #[error("execution exceeded its deadline")]
    Timeout,

    /// A status query named an execution this engine does not know.
    #[error("unknown execution id '{0}'")]
    UnknownExecution(Uuid),
}

impl ExecutionError {
    /// The failing state name, when one is known.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::StageFailed { state, .. } => Some(state),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_error_display() {
        let err = DefinitionError::MissingKey {
            stage: "Classify".to_string(),
            key: "encodedDocument".to_string(),
        };
        assert!(err.to_string().contains("Classify"));
        assert!(err.to_string().contains("encodedDocument"));
    }

    #[test]
    fn test_stage_error_retryable() {
        let err = StageError::retryable("Classify", "throttled");
        assert!(err.is_retryable());

        let err = StageError::validation("Classify", "bad payload");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_execution_error_carries_state() {
        let err = ExecutionError::StageFailed {
            state: "Classify".to_string(),
            source: StageError::retryable("Classify", "timeout"),
        };
        assert_eq!(err.state(), Some("Classify"));
        assert_eq!(ExecutionError::Timeout.state(), None);
    }

    #[test]
    fn test_definition_error_from_stage_error() {
        let err: StageError = DefinitionError::KeyCollision {
            key: "registryRecord".to_string(),
        }
        .into();
        assert!(err.to_string().contains("registryRecord"));
    }
}
