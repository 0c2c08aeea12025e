//! The per-execution context: a write-once mapping of named keys to values.
//!
//! Every stage declares the keys it reads and the key it writes. A key is
//! written at most once per execution; a second write is a definition error,
//! not a runtime conflict to resolve. Branches of a parallel node operate on
//! isolated forks and are folded back by the branch coordinator.

use crate::core::ContextValue;
use crate::errors::{DefinitionError, StageError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// The mutable context threaded through one execution.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    entries: RwLock<HashMap<String, ContextValue>>,
    /// Keys present when this context was forked from its parent. Empty for
    /// the root context. Merging folds back only keys outside the baseline.
    baseline: HashSet<String>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under a key. Write-once: inserting under an existing
    /// key fails with a key collision.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: ContextValue,
    ) -> Result<(), DefinitionError> {
        let key = key.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(DefinitionError::KeyCollision { key });
        }
        entries.insert(key, value);
        Ok(())
    }

    /// Returns a clone of the value under a key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.entries.read().get(key).cloned()
    }

    /// Returns the value under a key, or a missing-input error naming the
    /// stage that required it.
    pub fn require(&self, stage: &str, key: &str) -> Result<ContextValue, StageError> {
        self.get(key).ok_or_else(|| StageError::MissingInput {
            stage: stage.to_string(),
            key: key.to_string(),
        })
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns the current key set, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Creates an isolated fork for one branch of a parallel node. The fork
    /// sees the shared context as of the fork point and nothing written by
    /// sibling branches afterwards.
    #[must_use]
    pub fn fork(&self) -> Self {
        let entries = self.entries.read().clone();
        let baseline = entries.keys().cloned().collect();
        Self {
            entries: RwLock::new(entries),
            baseline,
        }
    }

    /// Folds a branch fork back into this context. Only keys the branch
    /// added beyond its fork baseline are merged; a key already present here
    /// (written by a sibling branch) is a collision even when the values
    /// happen to agree.
    pub fn merge_from(&self, branch: &Self) -> Result<(), DefinitionError> {
        let branch_entries = branch.entries.read();
        for (key, value) in branch_entries.iter() {
            if branch.baseline.contains(key) {
                continue;
            }
            self.insert(key.clone(), value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_and_get() {
        let ctx = ExecutionContext::new();
        ctx.insert("documentRef", ContextValue::text("uploads/doc123.png"))
            .unwrap();

        assert_eq!(
            ctx.get("documentRef").and_then(|v| v.as_str().map(String::from)),
            Some("uploads/doc123.png".to_string())
        );
    }

    #[test]
    fn test_write_once() {
        let ctx = ExecutionContext::new();
        ctx.insert("k", ContextValue::text("a")).unwrap();

        let err = ctx.insert("k", ContextValue::text("b")).unwrap_err();
        assert_eq!(err, DefinitionError::KeyCollision { key: "k".to_string() });
    }

    #[test]
    fn test_require_missing() {
        let ctx = ExecutionContext::new();
        let err = ctx.require("Classify", "encodedDocument").unwrap_err();
        assert!(matches!(err, StageError::MissingInput { .. }));
    }

    #[test]
    fn test_fork_is_isolated() {
        let ctx = ExecutionContext::new();
        ctx.insert("shared", ContextValue::text("x")).unwrap();

        let fork = ctx.fork();
        fork.insert("branch_only", ContextValue::text("y")).unwrap();

        assert!(fork.contains("shared"));
        assert!(!ctx.contains("branch_only"));
    }

    #[test]
    fn test_merge_from_adds_new_keys() {
        let ctx = ExecutionContext::new();
        ctx.insert("shared", ContextValue::text("x")).unwrap();

        let fork = ctx.fork();
        fork.insert("registryRecord", ContextValue::json(serde_json::json!({})))
            .unwrap();

        ctx.merge_from(&fork).unwrap();
        assert!(ctx.contains("registryRecord"));
    }

    #[test]
    fn test_merge_collision_between_branches() {
        let ctx = ExecutionContext::new();
        ctx.insert("shared", ContextValue::text("x")).unwrap();

        let branch_a = ctx.fork();
        let branch_b = ctx.fork();
        branch_a.insert("out", ContextValue::text("a")).unwrap();
        branch_b.insert("out", ContextValue::text("b")).unwrap();

        ctx.merge_from(&branch_a).unwrap();
        let err = ctx.merge_from(&branch_b).unwrap_err();
        assert_eq!(err, DefinitionError::KeyCollision { key: "out".to_string() });
    }

    #[test]
    fn test_merge_collision_even_with_equal_values() {
        let ctx = ExecutionContext::new();
        let branch_a = ctx.fork();
        let branch_b = ctx.fork();
        branch_a.insert("out", ContextValue::text("same")).unwrap();
        branch_b.insert("out", ContextValue::text("same")).unwrap();

        ctx.merge_from(&branch_a).unwrap();
        assert!(ctx.merge_from(&branch_b).is_err());
    }

    #[test]
    fn test_keys_sorted() {
        let ctx = ExecutionContext::new();
        ctx.insert("b", ContextValue::text("2")).unwrap();
        ctx.insert("a", ContextValue::text("1")).unwrap();
        assert_eq!(ctx.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
