//! Flat string key/value namespaces that stores live in.
//!
//! A namespace is the whole persistent world of a store: every store
//! sharing a namespace and a name sees the same keys. Backends:
//!
//! - [`MemoryNamespace`]: shared in-process map, optionally size-capped
//! - [`FileNamespace`]: one checksummed file per key, with a journal so
//!   multi-key batches survive a crash as a unit

mod file;
mod journal;
mod memory;

pub use file::{FileNamespace, FileNamespaceConfig};
pub use journal::{Journal, JournalEntry, JournalEntryStatus};
pub use memory::MemoryNamespace;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A single write against a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Remove { key } => key,
        }
    }
}

/// Writes applied together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Remove { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// A flat, persistent, string-to-string namespace.
pub trait Namespace: Send + Sync {
    /// Read the value at `key`, if any.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` at `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// All keys currently present, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Apply a batch of writes in order.
    ///
    /// The default applies each write on its own; backends that can make
    /// the batch all-or-nothing override this.
    fn apply(&self, batch: WriteBatch) -> Result<()> {
        for op in batch.into_ops() {
            match op {
                WriteOp::Set { key, value } => self.set_item(&key, &value)?,
                WriteOp::Remove { key } => self.remove_item(&key)?,
            }
        }
        Ok(())
    }
}
