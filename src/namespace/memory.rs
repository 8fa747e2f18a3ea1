//! In-process namespace.

use super::{Namespace, WriteBatch, WriteOp};
use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared in-memory namespace.
///
/// Clones share one underlying map, the way every page script sees the
/// same browser storage. An optional quota caps the total size of keys
/// plus values in bytes; a write that would exceed it fails and leaves
/// the namespace untouched.
#[derive(Clone, Default)]
pub struct MemoryNamespace {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota: Option<usize>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace that refuses to grow beyond `limit` bytes.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            entries: Arc::default(),
            quota: Some(limit),
        }
    }

    /// Number of keys present.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Bytes used by keys and values.
    pub fn used_bytes(&self) -> usize {
        Self::size_of(&self.entries.read())
    }

    fn size_of(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Size the map would have after `ops`, without applying them.
    fn projected_size(entries: &HashMap<String, String>, ops: &[WriteOp]) -> usize {
        let mut overlay: HashMap<&str, Option<&str>> = HashMap::new();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => overlay.insert(key.as_str(), Some(value.as_str())),
                WriteOp::Remove { key } => overlay.insert(key.as_str(), None),
            };
        }

        let mut size = Self::size_of(entries);
        for (key, value) in overlay {
            if let Some(old) = entries.get(key) {
                size -= key.len() + old.len();
            }
            if let Some(new) = value {
                size += key.len() + new.len();
            }
        }
        size
    }

    fn check_quota(&self, entries: &HashMap<String, String>, ops: &[WriteOp]) -> Result<()> {
        if let Some(limit) = self.quota {
            let needed = Self::projected_size(entries, ops);
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }
        Ok(())
    }
}

impl Namespace for MemoryNamespace {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        tracing::trace!(key, "memory get");
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        tracing::trace!(key, len = value.len(), "memory set");
        let mut entries = self.entries.write();
        self.check_quota(
            &entries,
            &[WriteOp::Set {
                key: key.to_string(),
                value: value.to_string(),
            }],
        )?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        tracing::trace!(key, "memory remove");
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.entries.write();
        self.check_quota(&entries, batch.ops())?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Set { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
