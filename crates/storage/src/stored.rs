//! Storage-layer document wrapper
//!
//! The contract type `Document` carries its id and collection. Inside a
//! collection map both are implied by position, and the storage layer needs
//! two things callers never see: tombstones and the commit sequence number of
//! the last write. `StoredDocument` holds exactly that.

use kipu_core::{Document, DocumentId, Fields, Revision};

/// A document as kept in a collection map
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    revision: Revision,
    /// `None` for a tombstone
    fields: Option<Fields>,
    seq: u64,
}

impl StoredDocument {
    /// Live document at `revision`, written by commit `seq`
    pub fn live(revision: Revision, fields: Fields, seq: u64) -> Self {
        StoredDocument {
            revision,
            fields: Some(fields),
            seq,
        }
    }

    /// Tombstone at `revision`, written by commit `seq`
    pub fn tombstone(revision: Revision, seq: u64) -> Self {
        StoredDocument {
            revision,
            fields: None,
            seq,
        }
    }

    /// Revision of the last write
    #[inline]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Commit sequence number of the last write
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Fields, `None` for a tombstone
    #[inline]
    pub fn fields(&self) -> Option<&Fields> {
        self.fields.as_ref()
    }

    /// Check if the document has been removed
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.fields.is_none()
    }

    /// Revision a caller observes: `None` when removed
    pub fn live_revision(&self) -> Option<Revision> {
        self.fields.as_ref().map(|_| self.revision)
    }

    /// Owned contract document, `None` for a tombstone
    pub fn to_document(&self, collection: &str, id: &DocumentId) -> Option<Document> {
        self.fields
            .as_ref()
            .map(|fields| Document::new(collection, id.clone(), self.revision, fields.clone()))
    }
}
