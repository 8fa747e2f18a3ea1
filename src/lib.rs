//! # Keystash
//!
//! Named record stores kept in a flat string key/value namespace, and a
//! dispatcher that serves model sync requests from them.
//!
//! ## Core Concepts
//!
//! - **Namespace**: flat persistent key/value space (in memory or on disk)
//! - **Store**: a named collection; its index lives at key `name`, each
//!   record at `name-<id>`
//! - **Dispatcher**: routes read/create/update/delete intents to a store,
//!   or to a remote sync when the target has none
//!
//! ## Example
//!
//! ```ignore
//! use keystash::{FileNamespace, FileNamespaceConfig, Record, Store};
//! use std::sync::Arc;
//!
//! let namespace = FileNamespace::open_or_create(FileNamespaceConfig {
//!     path: "./todos".into(),
//!     ..Default::default()
//! })?;
//! let mut store = Store::open("todos", Arc::new(namespace))?;
//!
//! let todo = store.create(Record::from_json(json!({"title": "milk"}))?)?;
//! assert!(store.find(&todo)?.is_some());
//! ```

pub mod error;
pub mod id;
pub mod model;
pub mod namespace;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use id::{is_guid_shaped, IdGenerator, IdScheme, LegacyGuidGenerator, UuidGenerator};
pub use model::{Collection, Model};
pub use namespace::{
    FileNamespace, FileNamespaceConfig, MemoryNamespace, Namespace, WriteBatch, WriteOp,
};
pub use store::{SharedStore, Store, StoreConfig};
pub use sync::{
    Dispatcher, NoRemoteSync, RemoteSync, SyncOptions, SyncResponse, Syncable, NO_REMOTE_SYNC,
    RECORD_NOT_FOUND,
};
pub use types::*;
