//! Storage layer for KipuDB
//!
//! This crate implements the document storage backend with:
//! - StorageEngine: collections, optimistic revision checks, WAL-first commits
//! - CollectionStore: DashMap of documents with tombstones, per-collection
//!   sequence lock for consistent multi-document reads
//! - FieldIndex: ordered secondary indexes on declared fields
//! - StoredDocument: storage-side document state (revision, tombstone, seq)
//!
//! # Concurrency
//!
//! - Point reads go straight to the sharded map
//! - Collection reads are optimistic and retried if a commit overlaps them
//! - Writers serialize only on the commit log, as every WAL append must

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod engine;
pub mod index;
pub mod stored;

pub use collection::{CollectionStore, CollectionView};
pub use engine::{CollectionSnapshot, StorageEngine};
pub use index::{CollectionIndexes, FieldIndex};
pub use stored::StoredDocument;
