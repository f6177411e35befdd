//! Query engine
//!
//! Evaluates a `Query` against one consistent view of its collection:
//!
//! 1. Narrow candidates with secondary indexes (`Eq`, `In`, ranges, `id`)
//! 2. Re-check the full predicate on every candidate
//! 3. Sort by the query's key (ties by id ascending)
//! 4. Apply `skip` and `limit`
//!
//! Evaluation is a pure function of the view, so the same query over the
//! same collection version always yields the same result.

use crate::schema::SchemaRegistry;
use kipu_core::error::{Error, Result};
use kipu_core::{Document, DocumentId, Predicate, Query, Value, ID_FIELD};
use kipu_storage::{CollectionView, StorageEngine};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

/// Query result at one collection version
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Commit sequence number of the collection the result was evaluated at
    pub version: u64,
    /// Matching documents in result order
    pub documents: Vec<Document>,
}

impl Snapshot {
    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents in result order
    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    /// Ids in result order
    pub fn ids(&self) -> Vec<DocumentId> {
        self.documents.iter().map(|d| d.id.clone()).collect()
    }
}

impl IntoIterator for Snapshot {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

/// Ids that could match `predicate`, or `None` when a scan is needed
fn candidates(predicate: &Predicate, view: &CollectionView<'_>) -> Option<BTreeSet<DocumentId>> {
    match predicate {
        Predicate::Eq(field, value) if field == ID_FIELD => Some(id_candidates(std::slice::from_ref(value))),
        Predicate::In(field, values) if field == ID_FIELD => Some(id_candidates(values)),
        Predicate::Eq(field, value) => view.index(field).map(|i| i.lookup_eq(value)),
        Predicate::In(field, values) => view.index(field).map(|i| {
            values.iter().flat_map(|v| i.lookup_eq(v)).collect()
        }),
        Predicate::Gt(field, v) => range(view, field, Bound::Excluded(v), Bound::Unbounded),
        Predicate::Gte(field, v) => range(view, field, Bound::Included(v), Bound::Unbounded),
        Predicate::Lt(field, v) => range(view, field, Bound::Unbounded, Bound::Excluded(v)),
        Predicate::Lte(field, v) => range(view, field, Bound::Unbounded, Bound::Included(v)),
        Predicate::And(ps) => ps
            .iter()
            .filter_map(|p| candidates(p, view))
            .reduce(|acc, next| acc.intersection(&next).cloned().collect()),
        Predicate::Or(ps) => {
            let mut union = BTreeSet::new();
            for p in ps {
                union.extend(candidates(p, view)?);
            }
            Some(union)
        }
        Predicate::All | Predicate::Ne(..) | Predicate::Exists(_) | Predicate::Not(_) => None,
    }
}

fn id_candidates(values: &[Value]) -> BTreeSet<DocumentId> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(DocumentId::from)
        .collect()
}

fn range(
    view: &CollectionView<'_>,
    field: &str,
    lower: Bound<&Value>,
    upper: Bound<&Value>,
) -> Option<BTreeSet<DocumentId>> {
    view.index(field).map(|i| i.lookup_range(lower, upper))
}

/// Evaluate `query` against `view`
pub fn execute(query: &Query, view: &CollectionView<'_>) -> Vec<Document> {
    let mut docs: Vec<Document> = match candidates(query.predicate(), view) {
        Some(ids) => ids.iter().filter_map(|id| view.get(id)).collect(),
        None => view.documents(),
    };
    docs.retain(|d| query.matches(d));
    docs.sort_by(|a, b| query.order(a, b));

    let limit = query.limit().unwrap_or(usize::MAX);
    docs.into_iter().skip(query.skip()).take(limit).collect()
}

/// Validated query evaluation over the storage engine
pub struct QueryEngine {
    storage: Arc<StorageEngine>,
    schemas: Arc<SchemaRegistry>,
}

impl QueryEngine {
    /// Create a query engine over `storage`, checking queries against `schemas`
    pub fn new(storage: Arc<StorageEngine>, schemas: Arc<SchemaRegistry>) -> Self {
        QueryEngine { storage, schemas }
    }

    /// Check that the collection is registered and every referenced field
    /// is declared (or `id`)
    pub fn validate(&self, query: &Query) -> Result<()> {
        let schema = self.schemas.get(query.collection_name())?;
        for field in query.referenced_fields() {
            if field != ID_FIELD && schema.field_type(field).is_none() {
                return Err(Error::InvalidQuery(format!(
                    "unknown field '{}' in query on '{}'",
                    field,
                    query.collection_name()
                )));
            }
        }
        Ok(())
    }

    /// Evaluate a query at a consistent collection version
    pub fn evaluate(&self, query: &Query) -> Result<Snapshot> {
        self.validate(query)?;
        Ok(self.evaluate_unchecked(query))
    }

    /// Evaluate an already validated query, retrying until consistent
    pub(crate) fn evaluate_unchecked(&self, query: &Query) -> Snapshot {
        let (version, documents) = self
            .storage
            .read(query.collection_name(), |view| execute(query, view));
        Snapshot { version, documents }
    }

    /// Single optimistic evaluation of an already validated query
    ///
    /// `None` if a commit overlapped it.
    pub(crate) fn try_evaluate(&self, query: &Query) -> Option<Snapshot> {
        self.storage
            .try_read(query.collection_name(), |view| execute(query, view))
            .map(|(version, documents)| Snapshot { version, documents })
    }

    /// Document by id, `None` if absent or removed
    pub fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        self.schemas.get(collection)?;
        match self.storage.get(collection, id) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of documents the query would return
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.evaluate(query).map(|s| s.len())
    }
}
