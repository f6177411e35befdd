//! WAL replay for recovery
//!
//! Rebuilds the latest state of every document from the write-ahead log.
//!
//! ## Replay Process
//!
//! 1. Scan the WAL from the beginning
//! 2. Truncate a torn tail (partial final record from a crash)
//! 3. Apply records in file order; the last record per document wins
//! 4. Preserve revisions and sequence numbers exactly as logged
//!
//! Sequence numbers must strictly increase through the file and revisions
//! must strictly increase per document. Anything else is `Corruption`.

use crate::wal::{WalRecord, WAL};
use kipu_core::error::{Error, Result};
use kipu_core::{DocumentId, Fields, Revision};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Latest recovered state of one document
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredDocument {
    /// Revision of the last record for this document
    pub revision: Revision,
    /// Fields, or `None` for a tombstone
    pub fields: Option<Fields>,
    /// Commit sequence number of the last record for this document
    pub seq: u64,
}

impl RecoveredDocument {
    /// Check if the document ended up removed
    pub fn is_tombstone(&self) -> bool {
        self.fields.is_none()
    }
}

/// Statistics from WAL replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records applied
    pub records_replayed: usize,
    /// Number of Put records applied
    pub puts: usize,
    /// Number of Delete records applied
    pub deletes: usize,
    /// Bytes cut from the tail of the WAL
    pub truncated_bytes: u64,
}

/// Result of recovery: per-collection document state
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Collection name → document id → latest state
    pub collections: BTreeMap<String, BTreeMap<DocumentId, RecoveredDocument>>,
    /// Highest commit sequence number seen (0 for an empty log)
    pub max_seq: u64,
    /// Replay statistics
    pub stats: RecoveryStats,
}

impl RecoveryResult {
    /// Number of documents (live and tombstoned) recovered
    pub fn document_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Every recovered document as a `WalRecord`, in sequence order
    ///
    /// This is the minimal log that reproduces the recovered state, which is
    /// what compaction writes.
    pub fn to_records(&self) -> Vec<WalRecord> {
        let mut records: Vec<WalRecord> = self
            .collections
            .iter()
            .flat_map(|(collection, docs)| {
                docs.iter().map(move |(id, doc)| match &doc.fields {
                    Some(fields) => WalRecord::Put {
                        seq: doc.seq,
                        collection: collection.clone(),
                        id: id.clone(),
                        revision: doc.revision,
                        fields: fields.clone(),
                    },
                    None => WalRecord::Delete {
                        seq: doc.seq,
                        collection: collection.clone(),
                        id: id.clone(),
                        revision: doc.revision,
                    },
                })
            })
            .collect();
        records.sort_by_key(WalRecord::seq);
        records
    }

    /// Apply one record on top of the state recovered so far
    fn apply(&mut self, record: WalRecord) -> Result<()> {
        let seq = record.seq();
        if seq <= self.max_seq {
            return Err(Error::Corruption(format!(
                "WAL sequence went backwards: {} after {}",
                seq, self.max_seq
            )));
        }

        let (collection, id, revision, fields) = match record {
            WalRecord::Put {
                collection,
                id,
                revision,
                fields,
                ..
            } => {
                self.stats.puts += 1;
                (collection, id, revision, Some(fields))
            }
            WalRecord::Delete {
                collection,
                id,
                revision,
                ..
            } => {
                self.stats.deletes += 1;
                (collection, id, revision, None)
            }
        };

        let docs = self.collections.entry(collection.clone()).or_default();
        if let Some(previous) = docs.get(&id) {
            if revision <= previous.revision {
                return Err(Error::Corruption(format!(
                    "revision of {}/{} went backwards: {} after {}",
                    collection, id, revision, previous.revision
                )));
            }
        }
        docs.insert(
            id,
            RecoveredDocument {
                revision,
                fields,
                seq,
            },
        );

        self.max_seq = seq;
        self.stats.records_replayed += 1;
        Ok(())
    }
}

/// Recovery coordinator
///
/// Replays one WAL file. Recovery is deterministic and idempotent: running
/// it twice on the same file yields the same result, and the first run
/// leaves the file without a torn tail.
pub struct RecoveryCoordinator {
    wal_path: PathBuf,
}

impl RecoveryCoordinator {
    /// Create a coordinator for the WAL at `wal_path`
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        RecoveryCoordinator {
            wal_path: wal_path.into(),
        }
    }

    /// Path of the WAL being recovered
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Replay the WAL, truncating a torn tail first
    pub fn recover(&self) -> Result<RecoveryResult> {
        let outcome = WAL::read_file(&self.wal_path)?;
        let mut result = RecoveryResult::default();

        if outcome.torn_tail_bytes > 0 {
            warn!(
                target: "kipu::wal",
                path = ?self.wal_path,
                valid_len = outcome.valid_len,
                torn_bytes = outcome.torn_tail_bytes,
                "Truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(&self.wal_path)?;
            file.set_len(outcome.valid_len)?;
            file.sync_all()?;
            result.stats.truncated_bytes = outcome.torn_tail_bytes;
        }

        for record in outcome.records {
            result.apply(record)?;
        }

        info!(
            target: "kipu::wal",
            path = ?self.wal_path,
            records = result.stats.records_replayed,
            puts = result.stats.puts,
            deletes = result.stats.deletes,
            documents = result.document_count(),
            max_seq = result.max_seq,
            "WAL replay complete"
        );

        Ok(result)
    }
}
