//! Mutation coordinator
//!
//! Every write goes through here:
//!
//! 1. Validate the resulting fields against the collection schema
//! 2. Commit through the storage engine with the expected revision
//! 3. Re-evaluate live queries on the collection
//!
//! Updates are read-modify-write. Losing a revision race is retried with
//! backoff per `RetryConfig`; schema violations and missing documents are
//! surfaced immediately.

use crate::database::RetryConfig;
use crate::live::SubscriptionManager;
use crate::schema::SchemaRegistry;
use kipu_core::error::Result;
use kipu_core::{Document, DocumentId, Fields, Revision, Value};
use kipu_storage::StorageEngine;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Field changes applied by an update
///
/// `set` replaces or adds a field, `unset` removes it. Unset wins when a
/// field appears in both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    set: Fields,
    unset: BTreeSet<String>,
}

impl Changes {
    /// No changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Remove `field`
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.insert(field.into());
        self
    }

    /// Check if there is nothing to change
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Apply to a field set in place
    pub fn apply(&self, fields: &mut Fields) {
        for (field, value) in &self.set {
            fields.insert(field.clone(), value.clone());
        }
        for field in &self.unset {
            fields.remove(field);
        }
    }
}

impl From<Fields> for Changes {
    fn from(set: Fields) -> Self {
        Changes {
            set,
            unset: BTreeSet::new(),
        }
    }
}

/// Applies inserts, updates and removes with optimistic concurrency
pub struct MutationCoordinator {
    storage: Arc<StorageEngine>,
    schemas: Arc<SchemaRegistry>,
    live: Arc<SubscriptionManager>,
    retry: RwLock<RetryConfig>,
}

impl MutationCoordinator {
    /// Create a coordinator
    pub fn new(
        storage: Arc<StorageEngine>,
        schemas: Arc<SchemaRegistry>,
        live: Arc<SubscriptionManager>,
        retry: RetryConfig,
    ) -> Self {
        MutationCoordinator {
            storage,
            schemas,
            live,
            retry: RwLock::new(retry),
        }
    }

    /// Current retry policy
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.read().clone()
    }

    /// Replace the retry policy
    pub fn set_retry_config(&self, retry: RetryConfig) {
        *self.retry.write() = retry;
    }

    /// Insert a new document under a generated id
    pub fn insert(&self, collection: &str, fields: Fields) -> Result<Document> {
        self.insert_with_id(collection, DocumentId::generate(), fields)
    }

    /// Insert a new document under `id`
    ///
    /// `AlreadyExists` if a live document has that id. A removed id can be
    /// reused; its revision continues past the removal.
    pub fn insert_with_id(&self, collection: &str, id: DocumentId, fields: Fields) -> Result<Document> {
        self.schemas.validate(collection, &fields)?;
        let doc = self.storage.put(collection, id, fields, None)?;
        debug!(target: "kipu::mutation", collection, id = %doc.id, "Inserted");
        self.live.notify(collection);
        Ok(doc)
    }

    /// Apply `changes` to the latest revision, retrying on conflict
    pub fn update(&self, collection: &str, id: &DocumentId, changes: &Changes) -> Result<Document> {
        self.modify(collection, id, |fields| {
            changes.apply(fields);
            Ok(())
        })
    }

    /// Apply `changes` only if the document is still at `expected`
    ///
    /// No retry: a concurrent write is reported as `RevisionConflict`.
    pub fn update_if(
        &self,
        collection: &str,
        id: &DocumentId,
        expected: Revision,
        changes: &Changes,
    ) -> Result<Document> {
        let current = self.storage.get(collection, id)?;
        let mut fields = current.fields;
        changes.apply(&mut fields);
        self.commit_update(collection, id, fields, expected)
    }

    /// Transform the latest fields with `f`, retrying on conflict
    ///
    /// `f` may run more than once and must not have side effects beyond
    /// the fields it is given. An error from `f` aborts the update.
    pub fn modify<F>(&self, collection: &str, id: &DocumentId, mut f: F) -> Result<Document>
    where
        F: FnMut(&mut Fields) -> Result<()>,
    {
        self.schemas.get(collection)?;
        let retry = self.retry_config();

        let mut attempt = 0;
        loop {
            let current = self.storage.get(collection, id)?;
            let mut fields = current.fields;
            f(&mut fields)?;

            match self.commit_update(collection, id, fields, current.revision) {
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.calculate_delay(attempt);
                    debug!(
                        target: "kipu::mutation",
                        collection,
                        %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Revision conflict, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_conflict() {
                        debug!(target: "kipu::mutation", collection, %id, attempt, "Retries exhausted");
                    }
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }

    fn commit_update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
        expected: Revision,
    ) -> Result<Document> {
        self.schemas.validate(collection, &fields)?;
        let doc = self
            .storage
            .put(collection, id.clone(), fields, Some(expected))?;
        debug!(target: "kipu::mutation", collection, %id, revision = %doc.revision, "Updated");
        self.live.notify(collection);
        Ok(doc)
    }

    /// Remove a document; `NotFound` if it is absent or already removed
    pub fn remove(&self, collection: &str, id: &DocumentId) -> Result<Revision> {
        self.remove_inner(collection, id, None)
    }

    /// Remove a document only if it is still at `expected`
    pub fn remove_if(&self, collection: &str, id: &DocumentId, expected: Revision) -> Result<Revision> {
        self.remove_inner(collection, id, Some(expected))
    }

    fn remove_inner(&self, collection: &str, id: &DocumentId, expected: Option<Revision>) -> Result<Revision> {
        self.schemas.get(collection)?;
        let revision = self.storage.delete(collection, id, expected)?;
        debug!(target: "kipu::mutation", collection, %id, %revision, "Removed");
        self.live.notify(collection);
        Ok(revision)
    }
}
