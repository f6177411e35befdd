//! Per-collection document storage
//!
//! # Design
//!
//! - DashMap: sharded document map, point reads never wait on other shards
//! - Tombstones stay in the map so revisions continue across remove/re-insert
//! - `epoch`: sequence lock. Odd while a commit is being applied; readers that
//!   see it change (or odd) retry, so a multi-document read is always a view
//!   at exactly one collection version
//! - `version`: commit sequence number of the last write to this collection
//!
//! Mutation happens only through `apply`, which the storage engine calls
//! while holding its commit lock; that is what makes a single writer per
//! epoch window.

use crate::index::{CollectionIndexes, FieldIndex};
use crate::stored::StoredDocument;
use dashmap::DashMap;
use kipu_core::{Document, DocumentId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};

/// Documents and indexes of one collection
#[derive(Debug)]
pub struct CollectionStore {
    name: String,
    docs: DashMap<DocumentId, StoredDocument>,
    indexes: RwLock<CollectionIndexes>,
    epoch: AtomicU64,
    version: AtomicU64,
}

impl CollectionStore {
    /// Create an empty collection store
    pub fn new(name: impl Into<String>) -> Self {
        CollectionStore {
            name: name.into(),
            docs: DashMap::new(),
            indexes: RwLock::new(CollectionIndexes::new()),
            epoch: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit sequence number of the last write (0 if never written)
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Stored state of one document, tombstones included
    pub fn stored(&self, id: &DocumentId) -> Option<StoredDocument> {
        self.docs.get(id).map(|e| e.value().clone())
    }

    /// Live document by id
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.docs
            .get(id)
            .and_then(|e| e.value().to_document(&self.name, id))
    }

    /// Number of live documents
    pub fn live_count(&self) -> usize {
        self.docs.iter().filter(|e| !e.value().is_tombstone()).count()
    }

    /// Apply one committed write
    ///
    /// Caller must hold the storage commit lock and must already have made
    /// the write durable.
    pub(crate) fn apply(&self, id: DocumentId, stored: StoredDocument) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut indexes = self.indexes.write();
            let previous = self.docs.get(&id).map(|e| e.value().clone());
            indexes.update(
                &id,
                previous.as_ref().and_then(StoredDocument::fields),
                stored.fields(),
            );
            let seq = stored.seq();
            self.docs.insert(id, stored);
            self.version.store(seq, Ordering::Release);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Load recovered state without touching the epoch (no readers yet)
    pub(crate) fn load(&self, id: DocumentId, stored: StoredDocument) {
        let seq = stored.seq();
        self.indexes.write().update(&id, None, stored.fields());
        self.docs.insert(id, stored);
        if seq > self.version.load(Ordering::Acquire) {
            self.version.store(seq, Ordering::Release);
        }
    }

    /// Build an index on `field` from current documents
    ///
    /// Caller must hold the storage commit lock. Returns false if the field
    /// was already indexed.
    pub(crate) fn create_index(&self, field: &str) -> bool {
        let mut indexes = self.indexes.write();
        if indexes.contains(field) {
            return false;
        }
        let live: Vec<(DocumentId, kipu_core::Fields)> = self
            .docs
            .iter()
            .filter_map(|e| e.value().fields().map(|f| (e.key().clone(), f.clone())))
            .collect();
        indexes.create(field, live.iter().map(|(id, f)| (id, f)))
    }

    /// Every stored document with its id, tombstones included
    pub(crate) fn all_stored(&self) -> Vec<(DocumentId, StoredDocument)> {
        self.docs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Run `read` against a consistent view
    ///
    /// Returns `None` if a commit overlapped the read.
    pub fn try_read<R>(&self, read: impl FnOnce(&CollectionView<'_>) -> R) -> Option<(u64, R)> {
        let before = self.epoch.load(Ordering::Acquire);
        if before % 2 == 1 {
            return None;
        }
        let (version, out) = {
            let view = CollectionView {
                store: self,
                indexes: self.indexes.read(),
            };
            (self.version.load(Ordering::Acquire), read(&view))
        };
        if self.epoch.load(Ordering::Acquire) == before {
            Some((version, out))
        } else {
            None
        }
    }

    /// Run `read` with no commit in progress
    ///
    /// Caller must hold the storage commit lock.
    pub(crate) fn read_locked<R>(&self, read: impl FnOnce(&CollectionView<'_>) -> R) -> (u64, R) {
        let view = CollectionView {
            store: self,
            indexes: self.indexes.read(),
        };
        (self.version(), read(&view))
    }
}

/// Read access to one collection during a consistent read
pub struct CollectionView<'a> {
    store: &'a CollectionStore,
    indexes: RwLockReadGuard<'a, CollectionIndexes>,
}

impl<'a> CollectionView<'a> {
    /// Collection name
    pub fn name(&self) -> &str {
        &self.store.name
    }

    /// Live document by id
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.store.get(id)
    }

    /// Every live document, in id order
    pub fn documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .store
            .docs
            .iter()
            .filter_map(|e| e.value().to_document(&self.store.name, e.key()))
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    /// Index on `field`, if one exists
    pub fn index(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field)
    }

    /// Indexed field names
    pub fn indexed_fields(&self) -> Vec<&str> {
        self.indexes.fields().collect()
    }
}
