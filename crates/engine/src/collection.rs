//! Collection: handle to one registered collection
//!
//! ## Design
//!
//! Collection is a stateless facade over the Database engine. It holds no
//! in-memory state beyond an `Arc<Database>` reference and the collection's
//! schema, so handles are cheap to clone and safe to share across threads.
//!
//! ## API
//!
//! - `insert(fields)` / `insert_with_id(id, fields)` - Create a document
//! - `get(id)` - Latest live document
//! - `update(id, changes)` - Read-modify-write with retry
//! - `update_if(id, revision, changes)` - Single compare-and-set
//! - `modify(id, f)` - Closure transition with retry
//! - `remove(id)` - Remove a document
//! - `find(query)` / `count(query)` / `subscribe(query)` - Queries

use crate::coordinator::Changes;
use crate::database::Database;
use crate::live::Subscription;
use crate::query::Snapshot;
use kipu_core::error::{Error, Result};
use kipu_core::{CollectionSchema, Document, DocumentId, Fields, Query, QueryBuilder, Revision};
use std::sync::Arc;

/// Handle to a registered collection
///
/// # Example
///
/// ```ignore
/// let notes = db.register_collection(schema)?;
/// let doc = notes.insert(fields)?;
/// let doc = notes.update(&doc.id, &Changes::new().set("title", "hi"))?;
/// notes.remove(&doc.id)?;
/// ```
#[derive(Clone)]
pub struct Collection {
    db: Arc<Database>,
    schema: Arc<CollectionSchema>,
}

impl Collection {
    pub(crate) fn new(db: Arc<Database>, schema: Arc<CollectionSchema>) -> Self {
        Self { db, schema }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Declared schema
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Owning database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // ========== Writes ==========

    /// Insert a document under a generated id
    pub fn insert(&self, fields: Fields) -> Result<Document> {
        self.db.mutations().insert(self.name(), fields)
    }

    /// Insert a document under a caller-chosen id
    pub fn insert_with_id(&self, id: impl Into<DocumentId>, fields: Fields) -> Result<Document> {
        self.db.mutations().insert_with_id(self.name(), id.into(), fields)
    }

    /// Apply changes to the latest revision, retrying on conflict
    pub fn update(&self, id: &DocumentId, changes: &Changes) -> Result<Document> {
        self.db.mutations().update(self.name(), id, changes)
    }

    /// Apply changes only if the document is still at `expected`
    pub fn update_if(&self, id: &DocumentId, expected: Revision, changes: &Changes) -> Result<Document> {
        self.db.mutations().update_if(self.name(), id, expected, changes)
    }

    /// Transform the latest fields, retrying on conflict
    pub fn modify<F>(&self, id: &DocumentId, f: F) -> Result<Document>
    where
        F: FnMut(&mut Fields) -> Result<()>,
    {
        self.db.mutations().modify(self.name(), id, f)
    }

    /// Remove a document
    pub fn remove(&self, id: &DocumentId) -> Result<Revision> {
        self.db.mutations().remove(self.name(), id)
    }

    /// Remove a document only if it is still at `expected`
    pub fn remove_if(&self, id: &DocumentId, expected: Revision) -> Result<Revision> {
        self.db.mutations().remove_if(self.name(), id, expected)
    }

    // ========== Reads ==========

    /// Latest live document
    pub fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.db.find_one(self.name(), id)
    }

    /// Start a query over this collection
    pub fn query(&self) -> QueryBuilder {
        Query::collection(self.name())
    }

    /// Evaluate a query once
    pub fn find(&self, query: &Query) -> Result<Snapshot> {
        self.check_target(query)?;
        self.db.find(query)
    }

    /// Every document, ordered by id
    pub fn all(&self) -> Result<Snapshot> {
        self.db.find(&Query::all(self.name()))
    }

    /// Number of documents a query returns
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.check_target(query)?;
        self.db.count(query)
    }

    /// Start a live query over this collection
    pub fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.check_target(&query)?;
        self.db.subscribe(query)
    }

    fn check_target(&self, query: &Query) -> Result<()> {
        if query.collection_name() != self.name() {
            return Err(Error::InvalidQuery(format!(
                "query targets '{}', not '{}'",
                query.collection_name(),
                self.name()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .field("version", &self.schema.version())
            .finish()
    }
}
