//! Storage engine
//!
//! Owns every collection store and the commit log. A commit:
//!
//! 1. Takes the commit lock (the only lock writers share)
//! 2. Checks the expected revision against the stored one
//! 3. Appends the WAL record (fsynced in `Always` mode)
//! 4. Applies the write to the collection under its sequence lock
//!
//! A failed WAL append returns before step 4, so memory never runs ahead of
//! the log. Sequence numbers are global and handed out under the commit
//! lock, which makes the WAL order the commit order.
//!
//! Readers never take the commit lock except as a last resort after a
//! consistent optimistic read keeps failing under heavy write load.

use crate::collection::{CollectionStore, CollectionView};
use crate::stored::StoredDocument;
use dashmap::DashMap;
use kipu_core::error::{Error, Result};
use kipu_core::{Document, DocumentId, Fields, Revision};
use kipu_durability::{
    compact_wal, CompactInfo, DurabilityMode, RecoveryCoordinator, RecoveryStats, WalRecord, WAL,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optimistic attempts before a read falls back to the commit lock
const OPTIMISTIC_READ_ATTEMPTS: usize = 64;

/// Consistent view of a collection at one version
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Commit sequence number of the last write included
    pub version: u64,
    /// Live documents in id order
    pub documents: Vec<Document>,
}

struct CommitLog {
    wal: Option<WAL>,
    next_seq: u64,
}

/// Storage engine: collections, commit log and durability
pub struct StorageEngine {
    collections: DashMap<String, Arc<CollectionStore>>,
    commit: Mutex<CommitLog>,
    wal_path: Option<PathBuf>,
    durability: DurabilityMode,
    closed: AtomicBool,
}

impl StorageEngine {
    /// Storage with no files; nothing survives the process
    pub fn in_memory() -> Self {
        StorageEngine {
            collections: DashMap::new(),
            commit: Mutex::new(CommitLog {
                wal: None,
                next_seq: 1,
            }),
            wal_path: None,
            durability: DurabilityMode::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Open storage backed by the WAL at `wal_path`, replaying it first
    pub fn open(wal_path: impl AsRef<Path>, durability: DurabilityMode) -> Result<(Self, RecoveryStats)> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let recovered = RecoveryCoordinator::new(&wal_path).recover()?;

        let collections = DashMap::new();
        for (name, docs) in recovered.collections {
            let store = CollectionStore::new(name.clone());
            for (id, doc) in docs {
                let stored = match doc.fields {
                    Some(fields) => StoredDocument::live(doc.revision, fields, doc.seq),
                    None => StoredDocument::tombstone(doc.revision, doc.seq),
                };
                store.load(id, stored);
            }
            collections.insert(name, Arc::new(store));
        }

        let wal = WAL::open(&wal_path, durability)?;
        info!(
            target: "kipu::wal",
            path = ?wal_path,
            mode = %durability,
            next_seq = recovered.max_seq + 1,
            "WAL opened"
        );

        let engine = StorageEngine {
            collections,
            commit: Mutex::new(CommitLog {
                wal: Some(wal),
                next_seq: recovered.max_seq + 1,
            }),
            wal_path: Some(wal_path),
            durability,
            closed: AtomicBool::new(false),
        };
        Ok((engine, recovered.stats))
    }

    /// Whether this engine writes a WAL
    pub fn is_persistent(&self) -> bool {
        self.wal_path.is_some()
    }

    /// Durability mode of the WAL
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability
    }

    /// Names of collections holding any data or index
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn store(&self, collection: &str) -> Option<Arc<CollectionStore>> {
        self.collections.get(collection).map(|e| Arc::clone(e.value()))
    }

    fn store_or_create(&self, collection: &str) -> Arc<CollectionStore> {
        Arc::clone(
            self.collections
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(CollectionStore::new(collection)))
                .value(),
        )
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ========================================
    // Reads
    // ========================================

    /// Live document by id; tombstones are `NotFound`
    pub fn get(&self, collection: &str, id: &DocumentId) -> Result<Document> {
        self.store(collection)
            .and_then(|s| s.get(id))
            .ok_or_else(|| Error::not_found(collection, id.clone()))
    }

    /// Revision a writer would have to expect, `None` if absent or removed
    pub fn current_revision(&self, collection: &str, id: &DocumentId) -> Option<Revision> {
        self.store(collection)
            .and_then(|s| s.stored(id))
            .and_then(|s| s.live_revision())
    }

    /// Commit sequence number of the last write to `collection`
    pub fn version(&self, collection: &str) -> u64 {
        self.store(collection).map(|s| s.version()).unwrap_or(0)
    }

    /// Number of live documents in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.store(collection).map(|s| s.live_count()).unwrap_or(0)
    }

    /// Single optimistic consistent read of `collection`
    ///
    /// `None` if a commit overlapped it. A collection that was never written
    /// reads as empty at version 0.
    pub fn try_read<R>(
        &self,
        collection: &str,
        read: impl FnOnce(&CollectionView<'_>) -> R,
    ) -> Option<(u64, R)> {
        self.store_or_create(collection).try_read(read)
    }

    /// Consistent read of `collection`, retrying until no commit overlaps
    pub fn read<R>(&self, collection: &str, mut read: impl FnMut(&CollectionView<'_>) -> R) -> (u64, R) {
        let store = self.store_or_create(collection);
        for _ in 0..OPTIMISTIC_READ_ATTEMPTS {
            if let Some(out) = store.try_read(&mut read) {
                return out;
            }
            std::hint::spin_loop();
        }
        debug!(target: "kipu::db", collection, "Optimistic read starved, reading under commit lock");
        let _commit = self.commit.lock();
        store.read_locked(read)
    }

    /// Consistent snapshot of every live document in `collection`
    pub fn snapshot(&self, collection: &str) -> CollectionSnapshot {
        let (version, documents) = self.read(collection, |view| view.documents());
        CollectionSnapshot { version, documents }
    }

    // ========================================
    // Writes
    // ========================================

    /// Write a document's full field set
    ///
    /// `expected = None` means the document must not exist (insert): a live
    /// document gives `AlreadyExists`, a tombstone is overwritten and the
    /// revision continues past it. `expected = Some(r)` requires the live
    /// document to be at exactly `r`, otherwise `RevisionConflict`.
    pub fn put(
        &self,
        collection: &str,
        id: DocumentId,
        fields: Fields,
        expected: Option<Revision>,
    ) -> Result<Document> {
        self.check_open()?;
        let store = self.store_or_create(collection);
        let mut log = self.commit.lock();
        self.check_open()?;

        let current = store.stored(&id);
        let actual = current.as_ref().and_then(StoredDocument::live_revision);
        if actual != expected {
            return Err(if expected.is_none() {
                Error::AlreadyExists {
                    collection: collection.to_string(),
                    id,
                }
            } else {
                debug!(target: "kipu::db", collection, %id, ?expected, ?actual, "Revision conflict");
                Error::RevisionConflict {
                    collection: collection.to_string(),
                    id,
                    expected,
                    actual,
                }
            });
        }

        let revision = current
            .map(|c| c.revision().next())
            .unwrap_or(Revision::FIRST);
        let seq = log.next_seq;
        if let Some(wal) = log.wal.as_mut() {
            wal.append(&WalRecord::Put {
                seq,
                collection: collection.to_string(),
                id: id.clone(),
                revision,
                fields: fields.clone(),
            })?;
        }
        log.next_seq += 1;

        let doc = Document::new(collection, id.clone(), revision, fields.clone());
        store.apply(id, StoredDocument::live(revision, fields, seq));
        Ok(doc)
    }

    /// Remove a document, leaving a tombstone
    ///
    /// `expected = None` removes whatever revision is live. Returns the
    /// tombstone revision.
    pub fn delete(&self, collection: &str, id: &DocumentId, expected: Option<Revision>) -> Result<Revision> {
        self.check_open()?;
        let store = self
            .store(collection)
            .ok_or_else(|| Error::not_found(collection, id.clone()))?;
        let mut log = self.commit.lock();
        self.check_open()?;

        let actual = store.stored(id).and_then(|s| s.live_revision());
        let current = match actual {
            Some(r) => r,
            None => return Err(Error::not_found(collection, id.clone())),
        };
        if let Some(expected) = expected {
            if expected != current {
                return Err(Error::RevisionConflict {
                    collection: collection.to_string(),
                    id: id.clone(),
                    expected: Some(expected),
                    actual,
                });
            }
        }

        let revision = current.next();
        let seq = log.next_seq;
        if let Some(wal) = log.wal.as_mut() {
            wal.append(&WalRecord::Delete {
                seq,
                collection: collection.to_string(),
                id: id.clone(),
                revision,
            })?;
        }
        log.next_seq += 1;

        store.apply(id.clone(), StoredDocument::tombstone(revision, seq));
        Ok(revision)
    }

    /// Maintain a secondary index on `field` of `collection`
    ///
    /// Builds it from existing documents on first call; later calls are
    /// no-ops. Indexes live in memory and are rebuilt on open.
    pub fn ensure_index(&self, collection: &str, field: &str) {
        let store = self.store_or_create(collection);
        let _commit = self.commit.lock();
        if store.create_index(field) {
            debug!(target: "kipu::db", collection, field, "Index built");
        }
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Rewrite the WAL as one record per document
    ///
    /// `None` for in-memory storage.
    pub fn compact(&self) -> Result<Option<CompactInfo>> {
        self.check_open()?;
        let path = match &self.wal_path {
            Some(path) => path.clone(),
            None => return Ok(None),
        };

        let mut log = self.commit.lock();
        let mut records = Vec::new();
        for entry in self.collections.iter() {
            let name = entry.key();
            for (id, stored) in entry.value().all_stored() {
                records.push(match stored.fields() {
                    Some(fields) => WalRecord::Put {
                        seq: stored.seq(),
                        collection: name.clone(),
                        id,
                        revision: stored.revision(),
                        fields: fields.clone(),
                    },
                    None => WalRecord::Delete {
                        seq: stored.seq(),
                        collection: name.clone(),
                        id,
                        revision: stored.revision(),
                    },
                });
            }
        }
        records.sort_by_key(WalRecord::seq);

        // Close the current handle so the rename replaces a file nobody writes
        drop(log.wal.take());
        let result = compact_wal(&path, &records);
        match WAL::open(&path, self.durability) {
            Ok(wal) => log.wal = Some(wal),
            Err(e) => {
                // Without a log, further writes would not be durable
                warn!(target: "kipu::wal", error = %e, "Failed to reopen WAL after compaction, closing");
                self.closed.store(true, Ordering::Release);
                return Err(e);
            }
        }
        result.map(Some)
    }

    /// Force buffered WAL writes to disk
    pub fn flush(&self) -> Result<()> {
        let mut log = self.commit.lock();
        if let Some(wal) = log.wal.as_mut() {
            wal.fsync()?;
        }
        Ok(())
    }

    /// Flush and stop accepting writes
    ///
    /// Idempotent. Reads keep working on the in-memory state.
    pub fn close(&self) -> Result<()> {
        let mut log = self.commit.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut wal) = log.wal.take() {
            if let Err(e) = wal.fsync() {
                warn!(target: "kipu::wal", error = %e, "Final WAL sync failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Check if `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
