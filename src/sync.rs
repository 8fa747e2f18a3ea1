//! Routing of model sync intents to a local store.
//!
//! A [`Dispatcher`] is chosen when models are wired up; there is no
//! process-wide sync hook to swap. Targets that carry a store (directly
//! or through their collection) are served from it. Everything else goes
//! to the injected [`RemoteSync`].

use crate::error::Result;
use crate::store::SharedStore;
use crate::types::{Intent, Record, RecordId};

/// Failure message for a lookup that found nothing.
pub const RECORD_NOT_FOUND: &str = "Record not found";

/// Failure message used by [`NoRemoteSync`].
pub const NO_REMOTE_SYNC: &str = "no remote sync configured";

/// What a successful sync hands back.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncResponse {
    /// A single record (find, create, update, delete).
    Record(Record),
    /// The whole store in index order; missing records are `None`.
    Records(Vec<Option<Record>>),
}

impl SyncResponse {
    pub fn into_record(self) -> Option<Record> {
        match self {
            SyncResponse::Record(record) => Some(record),
            SyncResponse::Records(_) => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Option<Record>>> {
        match self {
            SyncResponse::Records(records) => Some(records),
            SyncResponse::Record(_) => None,
        }
    }
}

pub type SuccessFn<'a> = Box<dyn FnOnce(SyncResponse) + 'a>;
pub type FailureFn<'a> = Box<dyn FnOnce(String) + 'a>;

/// Success and failure continuations of one sync call.
pub struct SyncOptions<'a> {
    on_success: SuccessFn<'a>,
    on_failure: Option<FailureFn<'a>>,
}

impl<'a> SyncOptions<'a> {
    pub fn new(
        on_success: impl FnOnce(SyncResponse) + 'a,
        on_failure: impl FnOnce(String) + 'a,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Some(Box::new(on_failure)),
        }
    }

    /// Older call style: a success continuation plus an optional,
    /// separately supplied error continuation.
    pub fn legacy(on_success: SuccessFn<'a>, on_failure: Option<FailureFn<'a>>) -> Self {
        Self {
            on_success,
            on_failure,
        }
    }

    pub fn succeed(self, response: SyncResponse) {
        (self.on_success)(response)
    }

    /// Report a failure. Without a failure continuation it is only logged.
    pub fn fail(self, message: impl Into<String>) {
        let message = message.into();
        match self.on_failure {
            Some(on_failure) => on_failure(message),
            None => tracing::warn!(%message, "sync failed with no failure handler"),
        }
    }
}

/// A lone continuation is the success handler.
impl<'a, F> From<F> for SyncOptions<'a>
where
    F: FnOnce(SyncResponse) + 'a,
{
    fn from(on_success: F) -> Self {
        Self::legacy(Box::new(on_success), None)
    }
}

/// Something a model layer can sync: a model or a collection.
pub trait Syncable {
    /// Identity, if the target has one. Collections never do.
    fn id(&self) -> Option<&RecordId>;

    /// The record to write for create and update.
    fn to_record(&self) -> Record;

    /// Store attached directly to the target.
    fn local_store(&self) -> Option<SharedStore> {
        None
    }

    /// Store inherited from the owning collection.
    fn collection_store(&self) -> Option<SharedStore> {
        None
    }

    /// The store a sync is served from, direct before inherited.
    fn store(&self) -> Option<SharedStore> {
        self.local_store().or_else(|| self.collection_store())
    }
}

/// The network sync used for targets without a store.
pub trait RemoteSync: Send + Sync {
    fn sync(&self, intent: Intent, target: &dyn Syncable, options: SyncOptions<'_>) -> Result<()>;
}

/// Remote sync for setups that only ever use local stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRemoteSync;

impl RemoteSync for NoRemoteSync {
    fn sync(&self, intent: Intent, _target: &dyn Syncable, options: SyncOptions<'_>) -> Result<()> {
        tracing::debug!(%intent, "no store attached and no remote sync");
        options.fail(NO_REMOTE_SYNC);
        Ok(())
    }
}

/// Routes sync intents to a store or to the remote sync.
pub struct Dispatcher {
    remote: Box<dyn RemoteSync>,
}

impl Dispatcher {
    pub fn new(remote: impl RemoteSync + 'static) -> Self {
        Self {
            remote: Box::new(remote),
        }
    }

    /// A dispatcher whose remote side always fails.
    pub fn local_only() -> Self {
        Self::new(NoRemoteSync)
    }

    /// Carry out `intent` for `target`.
    ///
    /// A present result goes to the success continuation; a lookup that
    /// finds nothing goes to the failure continuation with
    /// [`RECORD_NOT_FOUND`]. Storage errors are returned, not reported
    /// through the continuations.
    pub fn sync<'a>(
        &self,
        intent: Intent,
        target: &dyn Syncable,
        options: impl Into<SyncOptions<'a>>,
    ) -> Result<()> {
        let options = options.into();

        let Some(store) = target.store() else {
            return self.remote.sync(intent, target, options);
        };

        // Released before the continuations run so they may use the store
        let response = {
            let mut store = store.lock();
            match intent {
                Intent::Read => match target.id() {
                    Some(id) => store.find_by_id(id)?.map(SyncResponse::Record),
                    None => Some(SyncResponse::Records(store.find_all()?)),
                },
                Intent::Create => Some(SyncResponse::Record(store.create(target.to_record())?)),
                Intent::Update => Some(SyncResponse::Record(store.update(target.to_record())?)),
                Intent::Delete => Some(SyncResponse::Record(store.destroy(target.to_record())?)),
            }
        };

        match response {
            Some(response) => options.succeed(response),
            None => options.fail(RECORD_NOT_FOUND),
        }
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::local_only()
    }
}
