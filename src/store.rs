//! Named record store over a flat namespace.
//!
//! A store called `name` keeps two kinds of keys:
//!
//! - `name`: the index, record ids joined with `,`
//! - `name-<id>`: one JSON-encoded record
//!
//! The in-memory `records` list mirrors the index and is written back in
//! full after every mutation. Each mutation's record write and index write
//! go to the namespace as one batch.

use crate::error::{Result, StoreError};
use crate::id::{IdGenerator, IdScheme};
use crate::namespace::{Namespace, WriteBatch};
use crate::types::{Record, RecordId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Separator between ids in the persisted index.
const INDEX_SEPARATOR: char = ',';

/// A store shared between a collection and its models.
pub type SharedStore = Arc<Mutex<Store>>;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Store name; also the index key and the record key prefix.
    pub name: String,

    /// How ids are generated for records created without one.
    pub id_scheme: IdScheme,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "records".to_string(),
            id_scheme: IdScheme::default(),
        }
    }
}

/// A named collection of records.
///
/// Two stores with the same name over the same namespace see the same
/// keys, but each writes the index from its own `records` list; the last
/// writer wins. Use [`Store::reload`] to pick up another instance's index.
pub struct Store {
    name: String,

    /// Member ids, in insertion order.
    records: Vec<RecordId>,

    namespace: Arc<dyn Namespace>,

    ids: Box<dyn IdGenerator>,
}

impl Store {
    /// Open the store `name` with default settings.
    pub fn open(name: impl Into<String>, namespace: Arc<dyn Namespace>) -> Result<Self> {
        Self::with_config(StoreConfig::new(name), namespace)
    }

    /// Open a store, loading its index from the namespace.
    pub fn with_config(config: StoreConfig, namespace: Arc<dyn Namespace>) -> Result<Self> {
        let records = Self::load_index(namespace.as_ref(), &config.name)?;
        tracing::debug!(store = %config.name, records = records.len(), "opened store");

        Ok(Self {
            name: config.name,
            records,
            namespace,
            ids: config.id_scheme.generator(),
        })
    }

    /// Replace the id generator.
    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Wrap for sharing between a collection and its models.
    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member ids, in index order.
    pub fn ids(&self) -> &[RecordId] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains(id)
    }

    /// Namespace key holding the record `id`.
    pub fn record_key(&self, id: &RecordId) -> String {
        format!("{}-{}", self.name, id)
    }

    /// Re-read the index from the namespace.
    pub fn reload(&mut self) -> Result<()> {
        self.records = Self::load_index(self.namespace.as_ref(), &self.name)?;
        Ok(())
    }

    /// Add a record, assigning it an id if it has none.
    ///
    /// The id is appended to the index even if already present.
    pub fn create(&mut self, mut record: Record) -> Result<Record> {
        let id = match &record.id {
            Some(id) => id.clone(),
            None => {
                let id = self.ids.generate();
                record.assign_id(id.clone());
                id
            }
        };

        let mut records = self.records.clone();
        records.push(id.clone());
        self.write(&id, &record, records)?;

        tracing::debug!(store = %self.name, id = %id, "created record");
        Ok(record)
    }

    /// Overwrite a record, indexing its id if not yet indexed.
    pub fn update(&mut self, record: Record) -> Result<Record> {
        let id = record.id.clone().ok_or(StoreError::MissingId)?;

        let mut records = self.records.clone();
        if !records.contains(&id) {
            records.push(id.clone());
        }
        self.write(&id, &record, records)?;

        tracing::debug!(store = %self.name, id = %id, "updated record");
        Ok(record)
    }

    /// Look up the stored copy of `record` by its id.
    pub fn find(&self, record: &Record) -> Result<Option<Record>> {
        let id = record.id.as_ref().ok_or(StoreError::MissingId)?;
        self.find_by_id(id)
    }

    /// Look up a record by id. Absent records are `None`, not an error.
    pub fn find_by_id(&self, id: &RecordId) -> Result<Option<Record>> {
        match self.namespace.get_item(&self.record_key(id))? {
            Some(text) => Ok(Some(Record::from_json_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Every indexed record, in index order.
    ///
    /// An indexed id whose record is missing yields `None` at its position.
    pub fn find_all(&self) -> Result<Vec<Option<Record>>> {
        self.records
            .iter()
            .map(|id| {
                let found = self.find_by_id(id)?;
                if found.is_none() {
                    tracing::warn!(store = %self.name, id = %id, "indexed record is missing");
                }
                Ok(found)
            })
            .collect()
    }

    /// Remove a record and every index entry for its id.
    pub fn destroy(&mut self, record: Record) -> Result<Record> {
        let id = record.id.clone().ok_or(StoreError::MissingId)?;

        let mut records = self.records.clone();
        records.retain(|r| r != &id);

        let mut batch = WriteBatch::new();
        batch
            .remove(self.record_key(&id))
            .set(self.name.clone(), Self::index_value(&records));
        self.namespace.apply(batch)?;
        self.records = records;

        tracing::debug!(store = %self.name, id = %id, "destroyed record");
        Ok(record)
    }

    /// Write one record plus the index, then adopt `records` in memory.
    fn write(&mut self, id: &RecordId, record: &Record, records: Vec<RecordId>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch
            .set(self.record_key(id), record.to_json_string()?)
            .set(self.name.clone(), Self::index_value(&records));
        self.namespace.apply(batch)?;
        self.records = records;
        Ok(())
    }

    fn load_index(namespace: &dyn Namespace, name: &str) -> Result<Vec<RecordId>> {
        Ok(match namespace.get_item(name)? {
            Some(index) if !index.is_empty() => {
                index.split(INDEX_SEPARATOR).map(RecordId::from).collect()
            }
            _ => Vec::new(),
        })
    }

    fn index_value(records: &[RecordId]) -> String {
        records
            .iter()
            .map(RecordId::as_str)
            .collect::<Vec<_>>()
            .join(&INDEX_SEPARATOR.to_string())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("records", &self.records)
            .finish()
    }
}
