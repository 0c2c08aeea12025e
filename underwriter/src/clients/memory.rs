//! In-memory artifact store.

use super::{ArtifactStore, ClientError};
use crate::core::{Artifact, ArtifactRef};
use async_trait::async_trait;
use dashmap::DashMap;

/// A process-local artifact store backed by a concurrent map.
///
/// Enforces the write-once key discipline the pipeline relies on: a second
/// `put` to the same key is rejected. Used by tests, benches, and local runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: DashMap<String, Vec<u8>>,
    metadata: DashMap<String, Artifact>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object, e.g. an uploaded document, bypassing write-once
    /// metadata tracking.
    pub fn seed(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects.insert(key.into(), bytes);
    }

    /// Returns metadata for every artifact written under an execution's
    /// namespace, sorted by key. Artifacts are never rolled back, so this is
    /// the diagnostic surface after a failed run.
    #[must_use]
    pub fn artifacts_for(&self, prefix: &str) -> Vec<Artifact> {
        let mut artifacts: Vec<Artifact> = self
            .metadata
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.value().clone())
            .collect();
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        artifacts
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<ArtifactRef, ClientError> {
        if self.objects.contains_key(key) {
            return Err(ClientError::InvalidInput(format!(
                "key '{key}' already written"
            )));
        }
        self.metadata
            .insert(key.to_string(), Artifact::new(key, bytes.len()));
        self.objects.insert(key.to_string(), bytes);
        Ok(ArtifactRef::new(key))
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ClientError> {
        self.objects
            .get(&reference.key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClientError::NotFound(reference.key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryArtifactStore::new();
        let reference = store.put("executions/x/a", b"hello".to_vec()).await.unwrap();
        let bytes = store.get(&reference).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_write_once() {
        let store = MemoryArtifactStore::new();
        store.put("k", b"a".to_vec()).await.unwrap();
        let err = store.put("k", b"b".to_vec()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryArtifactStore::new();
        let err = store.get(&ArtifactRef::new("nope")).await.unwrap_err();
        assert_eq!(err, ClientError::NotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_artifacts_for_prefix() {
        let store = MemoryArtifactStore::new();
        store.put("executions/a/one", b"1".to_vec()).await.unwrap();
        store.put("executions/a/two", b"2".to_vec()).await.unwrap();
        store.put("executions/b/one", b"3".to_vec()).await.unwrap();

        let artifacts = store.artifacts_for("executions/a/");
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].key, "executions/a/one");
    }

    #[tokio::test]
    async fn test_seed_is_readable() {
        let store = MemoryArtifactStore::new();
        store.seed("uploads/doc123.png", vec![1, 2, 3]);
        let bytes = store.get(&ArtifactRef::new("uploads/doc123.png")).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
