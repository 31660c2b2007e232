//! Remote document store boundary.
//!
//! The authoritative store is an external collaborator. The engine only needs
//! per-document get/set/delete and a "latest value" watch.

mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::models::FieldMap;

pub use memory::{MemoryRemoteStore, RemoteWrite};

/// Callback invoked with the full document on every authoritative change.
pub type WatchCallback = Arc<dyn Fn(RemoteDocument) + Send + Sync>;

/// A document as delivered by a remote watch.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub collection: String,
    pub doc_id: String,
    pub fields: FieldMap,
}

/// Cancel handle for a remote watch. Dropping it cancels the watch.
pub struct RemoteWatch {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RemoteWatch {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub const fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RemoteWatch {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for RemoteWatch {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteWatch")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Operations the engine needs from the authoritative document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document, `None` when it does not exist
    async fn get(&self, collection: &str, id: &str) -> Result<Option<FieldMap>, RemoteError>;

    /// Write a document; `merge` merges top-level fields instead of replacing
    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: FieldMap,
        merge: bool,
    ) -> Result<(), RemoteError>;

    /// Delete a document (deleting a missing document succeeds)
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Watch a document for changes until the returned handle is cancelled
    fn watch(&self, collection: &str, id: &str, callback: WatchCallback) -> RemoteWatch;
}
