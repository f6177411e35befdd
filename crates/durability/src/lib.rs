//! Durability layer for KipuDB
//!
//! This crate handles everything that touches disk:
//!
//! - WAL: append-only log with one record per committed document mutation
//! - Durability modes: Always (default), Standard
//! - Framed encoding with CRC32 checksums
//! - Recovery: replay of the WAL into per-collection document state
//! - Compaction: rewrite of the WAL down to one record per document

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compaction;
pub mod encoding;
pub mod recovery;
pub mod wal;

pub use compaction::{compact_wal, CompactInfo};
pub use recovery::{RecoveredDocument, RecoveryCoordinator, RecoveryResult, RecoveryStats};
pub use wal::{DurabilityMode, ReadOutcome, WalRecord, WAL};
