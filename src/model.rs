//! Minimal models and collections that sync through a [`Dispatcher`].
//!
//! A model may carry its own store or inherit the store of the collection
//! it came from. Both adopt what a successful sync returns, the way a
//! host framework would.

use crate::error::Result;
use crate::store::SharedStore;
use crate::sync::{Dispatcher, SyncOptions, SyncResponse, Syncable};
use crate::types::{Intent, Record, RecordId};
use std::cell::RefCell;

/// Result of one sync call, collected from its continuations.
enum Outcome {
    Success(SyncResponse),
    Failure(String),
}

fn run(dispatcher: &Dispatcher, intent: Intent, target: &dyn Syncable) -> Result<Option<Outcome>> {
    let outcome = RefCell::new(None);
    dispatcher.sync(
        intent,
        target,
        SyncOptions::new(
            |response| *outcome.borrow_mut() = Some(Outcome::Success(response)),
            |message| *outcome.borrow_mut() = Some(Outcome::Failure(message)),
        ),
    )?;
    Ok(outcome.into_inner())
}

/// A single record with an optional store.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub record: Record,
    store: Option<SharedStore>,
    collection_store: Option<SharedStore>,
    last_error: Option<String>,
}

impl Model {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            ..Default::default()
        }
    }

    /// Attach a store directly to this model.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether the model has never been saved.
    pub fn is_new(&self) -> bool {
        self.record.id.is_none()
    }

    /// Message of the most recent failed sync, cleared on success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Adopt a single-record response. Collection responses are ignored.
    pub fn apply(&mut self, response: SyncResponse) -> bool {
        match response.into_record() {
            Some(record) => {
                self.record = record;
                true
            }
            None => false,
        }
    }

    /// Create the model if new, otherwise update it.
    pub fn save(&mut self, dispatcher: &Dispatcher) -> Result<bool> {
        let intent = if self.is_new() {
            Intent::Create
        } else {
            Intent::Update
        };
        self.sync(dispatcher, intent)
    }

    /// Replace the model with its stored copy.
    pub fn fetch(&mut self, dispatcher: &Dispatcher) -> Result<bool> {
        self.sync(dispatcher, Intent::Read)
    }

    /// Remove the model from its store.
    pub fn destroy(&mut self, dispatcher: &Dispatcher) -> Result<bool> {
        self.sync(dispatcher, Intent::Delete)
    }

    fn sync(&mut self, dispatcher: &Dispatcher, intent: Intent) -> Result<bool> {
        match run(dispatcher, intent, &*self)? {
            Some(Outcome::Success(response)) => {
                self.last_error = None;
                Ok(self.apply(response))
            }
            Some(Outcome::Failure(message)) => {
                self.last_error = Some(message);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

impl Syncable for Model {
    fn id(&self) -> Option<&RecordId> {
        self.record.id.as_ref()
    }

    fn to_record(&self) -> Record {
        self.record.clone()
    }

    fn local_store(&self) -> Option<SharedStore> {
        self.store.clone()
    }

    fn collection_store(&self) -> Option<SharedStore> {
        self.collection_store.clone()
    }
}

/// An ordered set of models sharing a store.
#[derive(Clone, Debug, Default)]
pub struct Collection {
    store: Option<SharedStore>,
    pub models: Vec<Model>,
}

impl Collection {
    pub fn new(store: Option<SharedStore>) -> Self {
        Self {
            store,
            models: Vec::new(),
        }
    }

    /// A model that inherits this collection's store.
    pub fn model(&self, record: Record) -> Model {
        Model {
            record,
            collection_store: self.store.clone(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Model> {
        self.models.iter().find(|m| m.record.id.as_ref() == Some(id))
    }

    /// Replace the models with everything in the store.
    ///
    /// Index slots with no stored record are skipped.
    pub fn fetch(&mut self, dispatcher: &Dispatcher) -> Result<bool> {
        let records = match run(dispatcher, Intent::Read, &*self)? {
            Some(Outcome::Success(response)) => response.into_records(),
            _ => None,
        };

        match records {
            Some(records) => {
                self.models = records
                    .into_iter()
                    .flatten()
                    .map(|record| self.model(record))
                    .collect();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Save a new model through this collection's store and add it.
    pub fn create(&mut self, record: Record, dispatcher: &Dispatcher) -> Result<Option<&Model>> {
        let mut model = self.model(record);
        if !model.save(dispatcher)? {
            return Ok(None);
        }
        self.models.push(model);
        Ok(self.models.last())
    }
}

impl Syncable for Collection {
    fn id(&self) -> Option<&RecordId> {
        None
    }

    fn to_record(&self) -> Record {
        Record::default()
    }

    fn local_store(&self) -> Option<SharedStore> {
        self.store.clone()
    }
}
