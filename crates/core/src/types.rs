//! Core document types
//!
//! This module defines the foundational types:
//! - DocumentId: Primary key of a document within its collection
//! - Revision: Monotonic per-document write generation
//! - Document: Immutable snapshot of a stored document

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Field map of a document
pub type Fields = BTreeMap<String, Value>;

/// Name of the pseudo-field that addresses a document's primary key in queries
pub const ID_FIELD: &str = "id";

/// Primary key of a document
///
/// Unique within a collection and immutable after creation. Generated ids are
/// UUID v4 strings; callers may also supply their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a new random id (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Write generation of a single document
///
/// Starts at 1 on insert and increases by exactly one on every successful
/// mutation of the same id. A removed document keeps its last revision as a
/// tombstone so a later re-insert continues the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// Revision assigned by the first insert of an id
    pub const FIRST: Revision = Revision(1);

    /// Create a revision from its number
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The revision that follows this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw revision number
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable snapshot of a stored document
///
/// Documents handed out by the store are owned copies; mutating one never
/// touches stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key
    pub id: DocumentId,
    /// Write generation this snapshot was taken at
    pub revision: Revision,
    /// Collection the document belongs to
    pub collection: String,
    /// Field values (never contains the primary key)
    pub fields: Fields,
}

impl Document {
    /// Create a document snapshot
    pub fn new(
        collection: impl Into<String>,
        id: DocumentId,
        revision: Revision,
        fields: Fields,
    ) -> Self {
        Self {
            id,
            revision,
            collection: collection.into(),
            fields,
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Get an integer field
    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_int)
    }

    /// Resolve a query path: a field name, or `id` for the primary key
    ///
    /// A declared field literally named `id` is impossible (schemas reject it),
    /// so the pseudo-field never shadows data.
    pub fn lookup(&self, path: &str) -> Option<Cow<'_, Value>> {
        if path == ID_FIELD {
            return Some(Cow::Owned(Value::String(self.id.as_str().to_string())));
        }
        self.fields.get(path).map(Cow::Borrowed)
    }
}
