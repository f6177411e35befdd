//! Error types for KipuDB
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Kinds
//!
//! - `SchemaViolation`: bad or missing fields. Surfaced, never retried.
//! - `RevisionConflict`: concurrent write race. Retried internally up to a bound.
//! - `NotFound`: stale id. Surfaced immediately.
//! - Storage failures (`Io`, `Storage`, `Corruption`) are fatal to the operation
//!   that hit them and are never partially applied.

use crate::schema::SchemaViolation;
use crate::types::{DocumentId, Revision};
use std::io;
use thiserror::Error;

/// Result type alias for KipuDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for KipuDB
#[derive(Debug, Error)]
pub enum Error {
    /// Document fields do not satisfy the collection schema
    #[error("Schema violation in collection '{collection}': {violation}")]
    SchemaViolation {
        /// Collection the document was written to
        collection: String,
        /// What was wrong with the fields
        violation: SchemaViolation,
    },

    /// Optimistic concurrency check failed
    #[error(
        "Revision conflict on {collection}/{id}: expected {}, found {}",
        describe_revision(.expected),
        describe_revision(.actual)
    )]
    RevisionConflict {
        /// Collection of the contended document
        collection: String,
        /// Contended document
        id: DocumentId,
        /// Revision the writer based its change on (`None` = expected absent)
        expected: Option<Revision>,
        /// Revision currently stored (`None` = absent)
        actual: Option<Revision>,
    },

    /// Document does not exist (or was removed)
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection that was searched
        collection: String,
        /// Missing document id
        id: DocumentId,
    },

    /// Insert with an id that is already live in the collection
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists {
        /// Collection of the existing document
        collection: String,
        /// Duplicate id
        id: DocumentId,
    },

    /// Collection has not been registered
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// A collection was registered twice with different schemas
    #[error("Collection '{0}' is already registered with a different schema")]
    SchemaConflict(String),

    /// Schema declaration is inconsistent
    #[error("Invalid schema for '{collection}': {reason}")]
    InvalidSchema {
        /// Collection being declared
        collection: String,
        /// What is inconsistent
        reason: String,
    },

    /// Query references something the collection cannot answer
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Incomplete log entry (partial write at the tail, not corruption)
    #[error("Incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// File offset of the entry
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration file could not be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database has been closed
    #[error("Database is closed")]
    Closed,
}

fn describe_revision(revision: &Option<Revision>) -> String {
    match revision {
        Some(r) => format!("revision {}", r),
        None => "no document".to_string(),
    }
}

impl Error {
    /// Build a schema violation error for a collection
    pub fn schema(collection: impl Into<String>, violation: SchemaViolation) -> Self {
        Error::SchemaViolation {
            collection: collection.into(),
            violation,
        }
    }

    /// Build a not-found error
    pub fn not_found(collection: impl Into<String>, id: DocumentId) -> Self {
        Error::NotFound {
            collection: collection.into(),
            id,
        }
    }

    /// Whether retrying the same read-modify-write cycle may succeed
    ///
    /// Only revision conflicts are transient; every other kind is surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RevisionConflict { .. })
    }

    /// Check if this is a revision conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::RevisionConflict { .. })
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this is a schema violation
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, Error::SchemaViolation { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
