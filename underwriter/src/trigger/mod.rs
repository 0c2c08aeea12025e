//! The upload-event trigger adapter.
//!
//! Object storage emits an event for every newly created object; the adapter
//! starts one pipeline execution per document, injecting the document's
//! storage location as the initial context. Events for buckets other than
//! the configured document bucket are ignored.

use crate::pipeline::PipelineEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A new-object notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    /// The bucket the object was created in.
    pub bucket: String,
    /// The object key.
    #[serde(rename = "objectKey")]
    pub object_key: String,
}

impl UploadEvent {
    /// Creates an upload event.
    #[must_use]
    pub fn new(bucket: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_key: object_key.into(),
        }
    }
}

/// Starts pipeline executions from upload events.
#[derive(Debug)]
pub struct TriggerAdapter {
    engine: Arc<PipelineEngine>,
}

impl TriggerAdapter {
    /// Creates an adapter bound to an engine. The accepted bucket comes from
    /// the engine's configuration.
    #[must_use]
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self { engine }
    }

    /// Handles a new-object notification. Returns the started execution's
    /// id, or `None` when the event is for a different bucket.
    pub fn on_object_created(&self, event: &UploadEvent) -> Option<Uuid> {
        if event.bucket != self.engine.config().document_bucket {
            tracing::debug!(
                bucket = %event.bucket,
                object = %event.object_key,
                "ignoring upload outside the document bucket"
            );
            return None;
        }

        Some(self.engine.start(event.object_key.clone()))
    }
}
