//! WAL (Write-Ahead Log) record types and file operations
//!
//! Every committed document mutation is one record:
//! - Put: the full field set of a document at a new revision
//! - Delete: a tombstone at a new revision
//!
//! Each record carries the global commit sequence number `seq`, so the file
//! order is the commit order and replay can verify it.
//!
//! ## File Operations
//!
//! - `WAL::open()` - Open existing WAL or create new one
//! - `WAL::append()` - Write encoded record to end of file
//! - `WAL::read_all()` - Decode every record, tolerating a torn tail
//! - `WAL::fsync()` - Force sync to disk
//! - `WAL::size()` - Get current file size
//!
//! A failed append truncates the file back to where the record started, so a
//! write the caller saw fail can never be replayed later.

mod mode;

pub use mode::DurabilityMode;

use crate::encoding::{decode_record, encode_record};
use kipu_core::error::{Error, Result};
use kipu_core::{DocumentId, Fields, Revision};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

/// WAL record types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalRecord {
    /// Document written (insert or update)
    Put {
        /// Global commit sequence number
        seq: u64,
        /// Collection name
        collection: String,
        /// Document id
        id: DocumentId,
        /// Revision after this write
        revision: Revision,
        /// Complete field set after this write
        fields: Fields,
    },

    /// Document removed, leaving a tombstone
    Delete {
        /// Global commit sequence number
        seq: u64,
        /// Collection name
        collection: String,
        /// Document id
        id: DocumentId,
        /// Tombstone revision
        revision: Revision,
    },
}

impl WalRecord {
    /// Commit sequence number
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Delete { seq, .. } => *seq,
        }
    }

    /// Collection the record belongs to
    pub fn collection(&self) -> &str {
        match self {
            WalRecord::Put { collection, .. } | WalRecord::Delete { collection, .. } => collection,
        }
    }

    /// Document the record belongs to
    pub fn id(&self) -> &DocumentId {
        match self {
            WalRecord::Put { id, .. } | WalRecord::Delete { id, .. } => id,
        }
    }

    /// Revision the record establishes
    pub fn revision(&self) -> Revision {
        match self {
            WalRecord::Put { revision, .. } | WalRecord::Delete { revision, .. } => *revision,
        }
    }

    /// Check if this is a tombstone
    pub fn is_delete(&self) -> bool {
        matches!(self, WalRecord::Delete { .. })
    }
}

/// Result of scanning a WAL file
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Records in file order
    pub records: Vec<WalRecord>,
    /// Length of the intact prefix in bytes
    pub valid_len: u64,
    /// Bytes after the intact prefix that belong to a partially written record
    pub torn_tail_bytes: u64,
}

/// Write-Ahead Log with configurable durability
///
/// Append-only log of records persisted to disk. Not internally
/// synchronized: the storage engine owns it behind its commit lock.
pub struct WAL {
    /// File path
    path: PathBuf,

    /// File handle, opened in append mode
    file: File,

    /// Current file size (offset of the next record)
    current_offset: u64,

    /// Durability mode
    durability_mode: DurabilityMode,

    /// Last fsync time (for standard mode)
    last_fsync: Instant,

    /// Appends since last fsync (for standard mode)
    writes_since_fsync: usize,
}

impl WAL {
    /// Open existing WAL or create new one with specified durability mode
    ///
    /// Creates parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            current_offset,
            durability_mode,
            last_fsync: Instant::now(),
            writes_since_fsync: 0,
        })
    }

    /// Append record to WAL with durability mode handling
    ///
    /// - Always: fsync before returning
    /// - Standard: fsync after batch_size appends OR interval_ms elapsed
    ///
    /// Returns the offset the record was written at. On any failure the file
    /// is truncated back to that offset and the error is returned.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        let offset = self.current_offset;
        let encoded = encode_record(record)?;

        if let Err(e) = self.file.write_all(&encoded) {
            self.rollback_to(offset);
            return Err(Error::StorageError(format!(
                "Failed to write record at offset {}: {}",
                offset, e
            )));
        }

        let should_fsync = match self.durability_mode {
            DurabilityMode::Always => true,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                self.writes_since_fsync += 1;
                self.last_fsync.elapsed().as_millis() as u64 >= interval_ms
                    || self.writes_since_fsync >= batch_size
            }
        };

        if should_fsync {
            if let Err(e) = self.fsync() {
                self.rollback_to(offset);
                return Err(e);
            }
        }

        self.current_offset = offset + encoded.len() as u64;
        Ok(offset)
    }

    /// Force sync to disk
    pub fn fsync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::StorageError(format!("Failed to fsync: {}", e)))?;
        self.last_fsync = Instant::now();
        self.writes_since_fsync = 0;
        Ok(())
    }

    fn rollback_to(&mut self, offset: u64) {
        if let Err(e) = self.file.set_len(offset) {
            warn!(
                target: "kipu::wal",
                path = ?self.path,
                offset,
                error = %e,
                "Failed to truncate WAL after failed append"
            );
        }
        self.current_offset = offset;
    }

    /// Read every record in this WAL
    pub fn read_all(&self) -> Result<ReadOutcome> {
        Self::read_file(&self.path)
    }

    /// Read every record of the WAL file at `path`
    ///
    /// A missing file reads as empty. A record cut short at the end of the
    /// file (partial write during a crash), or a final record whose checksum
    /// fails exactly at end of file, is reported in `torn_tail_bytes` rather
    /// than as an error. Damage followed by more data is `Corruption`, and
    /// so is a short record whose remaining bytes still hold an intact one:
    /// a crash tears only the last frame.
    pub fn read_file(path: &Path) -> Result<ReadOutcome> {
        let buf = match std::fs::read(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReadOutcome::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut outcome = ReadOutcome::default();
        let mut pos = 0usize;

        while pos < buf.len() {
            match decode_record(&buf[pos..], pos as u64) {
                Ok((record, consumed)) => {
                    outcome.records.push(record);
                    pos += consumed;
                }
                Err(Error::IncompleteEntry { .. }) => {
                    if let Some(at) = next_intact_frame(&buf, pos + 1) {
                        return Err(Error::Corruption(format!(
                            "offset {}: record runs past end of file but an intact record follows at offset {}",
                            pos, at
                        )));
                    }
                    break;
                }
                Err(Error::Corruption(msg)) => {
                    if frame_ends_at_eof(&buf[pos..]) {
                        warn!(target: "kipu::wal", offset = pos, reason = %msg, "Discarding damaged final WAL record");
                        break;
                    }
                    return Err(Error::Corruption(msg));
                }
                Err(e) => return Err(e),
            }
        }

        outcome.valid_len = pos as u64;
        outcome.torn_tail_bytes = (buf.len() - pos) as u64;
        Ok(outcome)
    }

    /// Cut the file down to `len` bytes (drops a torn tail before appending)
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.sync_data()?;
        self.current_offset = len;
        Ok(())
    }

    /// Get current file size (offset for next write)
    pub fn size(&self) -> u64 {
        self.current_offset
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get durability mode
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

/// Whether the frame starting at `buf` claims to end exactly at end of buffer
fn frame_ends_at_eof(buf: &[u8]) -> bool {
    if buf.len() < 4 {
        return true;
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    let total = u32::from_le_bytes(len_bytes) as usize;
    4 + total == buf.len()
}

/// Offset of the first frame at or after `from` that decodes cleanly
fn next_intact_frame(buf: &[u8], from: usize) -> Option<usize> {
    (from..buf.len()).find(|&at| decode_record(&buf[at..], at as u64).is_ok())
}

impl Drop for WAL {
    fn drop(&mut self) {
        // Final fsync so standard-mode stragglers reach disk on clean shutdown
        let _ = self.file.sync_data();
    }
}
