//! Secondary field indexes
//!
//! A `FieldIndex` maps the values of one field to the ids of the live
//! documents holding them, ordered by `compare_values`, so equality, `In` and
//! range predicates can be answered without scanning the collection.
//!
//! Lookups return candidates. Values that compare equal across types (for
//! example `Int(1)` and `Float(1.0)`) share a key, so callers re-check the
//! predicate on every candidate.

use kipu_core::{compare_values, DocumentId, Fields, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Index key: a value ordered by `compare_values`
#[derive(Debug, Clone)]
struct IndexKey(Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

fn owned_bound(bound: Bound<&Value>) -> Bound<IndexKey> {
    match bound {
        Bound::Included(v) => Bound::Included(IndexKey(v.clone())),
        Bound::Excluded(v) => Bound::Excluded(IndexKey(v.clone())),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Secondary index: field value → document ids
#[derive(Debug, Default)]
pub struct FieldIndex {
    entries: BTreeMap<IndexKey, BTreeSet<DocumentId>>,
}

impl FieldIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add id under value
    pub fn insert(&mut self, value: &Value, id: DocumentId) {
        self.entries
            .entry(IndexKey(value.clone()))
            .or_default()
            .insert(id);
    }

    /// Remove id from under value
    ///
    /// Empty sets are dropped so the index doesn't accumulate dead keys.
    pub fn remove(&mut self, value: &Value, id: &DocumentId) {
        let key = IndexKey(value.clone());
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Ids whose value compares equal to `value`
    pub fn lookup_eq(&self, value: &Value) -> BTreeSet<DocumentId> {
        self.entries
            .get(&IndexKey(value.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Ids whose value falls within the bounds
    pub fn lookup_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> BTreeSet<DocumentId> {
        let (lower, upper) = (owned_bound(lower), owned_bound(upper));
        if let (
            Bound::Included(l) | Bound::Excluded(l),
            Bound::Included(u) | Bound::Excluded(u),
        ) = (&lower, &upper)
        {
            // BTreeMap::range panics on inverted bounds
            match l.cmp(u) {
                Ordering::Greater => return BTreeSet::new(),
                Ordering::Equal
                    if matches!(lower, Bound::Excluded(_)) || matches!(upper, Bound::Excluded(_)) =>
                {
                    return BTreeSet::new()
                }
                _ => {}
            }
        }
        self.entries
            .range((lower, upper))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All field indexes of one collection
#[derive(Debug, Default)]
pub struct CollectionIndexes {
    by_field: HashMap<String, FieldIndex>,
}

impl CollectionIndexes {
    /// Create an empty index set
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `field` is indexed
    pub fn contains(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    /// Index for `field`
    pub fn get(&self, field: &str) -> Option<&FieldIndex> {
        self.by_field.get(field)
    }

    /// Indexed field names
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.by_field.keys().map(String::as_str)
    }

    /// Add an index for `field`, filled from `docs`
    ///
    /// Returns false if the field was already indexed.
    pub fn create<'a>(
        &mut self,
        field: &str,
        docs: impl IntoIterator<Item = (&'a DocumentId, &'a Fields)>,
    ) -> bool {
        if self.by_field.contains_key(field) {
            return false;
        }
        let mut index = FieldIndex::new();
        for (id, fields) in docs {
            if let Some(v) = fields.get(field) {
                index.insert(v, id.clone());
            }
        }
        self.by_field.insert(field.to_string(), index);
        true
    }

    /// Move `id` from its old field values to its new ones
    ///
    /// `None` on either side means absent (new document or tombstone).
    pub fn update(&mut self, id: &DocumentId, old: Option<&Fields>, new: Option<&Fields>) {
        for (field, index) in self.by_field.iter_mut() {
            let before = old.and_then(|f| f.get(field));
            let after = new.and_then(|f| f.get(field));
            if before == after {
                continue;
            }
            if let Some(v) = before {
                index.remove(v, id);
            }
            if let Some(v) = after {
                index.insert(v, id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::from(s)
    }

    fn fields(created: i64) -> Fields {
        let mut f = Fields::new();
        f.insert("createdAt".to_string(), Value::Int(created));
        f
    }

    fn ids(set: BTreeSet<DocumentId>) -> Vec<String> {
        set.into_iter().map(|i| i.as_str().to_string()).collect()
    }

    // ========================================
    // FieldIndex Tests
    // ========================================

    #[test]
    fn test_eq_lookup() {
        let mut index = FieldIndex::new();
        index.insert(&Value::Int(10), id("a"));
        index.insert(&Value::Int(10), id("b"));
        index.insert(&Value::Int(20), id("c"));

        assert_eq!(ids(index.lookup_eq(&Value::Int(10))), vec!["a", "b"]);
        assert!(index.lookup_eq(&Value::Int(30)).is_empty());
    }

    #[test]
    fn test_numbers_share_keys_across_types() {
        let mut index = FieldIndex::new();
        index.insert(&Value::Int(1), id("a"));
        index.insert(&Value::Float(1.0), id("b"));
        assert_eq!(index.len(), 1);
        assert_eq!(ids(index.lookup_eq(&Value::Float(1.0))), vec!["a", "b"]);
    }

    #[test]
    fn test_large_ints_keep_distinct_keys_near_float() {
        let two_53 = 1i64 << 53;
        let mut index = FieldIndex::new();
        index.insert(&Value::Int(two_53), id("a"));
        index.insert(&Value::Int(two_53 + 1), id("b"));
        index.insert(&Value::Float(two_53 as f64), id("c"));
        assert_eq!(index.len(), 2);

        let above = index.lookup_range(
            Bound::Excluded(&Value::Float(two_53 as f64)),
            Bound::Unbounded,
        );
        assert_eq!(ids(above), vec!["b"]);
        assert_eq!(
            ids(index.lookup_eq(&Value::Float(two_53 as f64))),
            vec!["a", "c"]
        );
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let mut index = FieldIndex::new();
        index.insert(&Value::from("x"), id("a"));
        index.remove(&Value::from("x"), &id("a"));
        assert!(index.is_empty());
        // Removing something absent is a no-op
        index.remove(&Value::from("y"), &id("a"));
    }

    #[test]
    fn test_range_lookup() {
        let mut index = FieldIndex::new();
        for (n, name) in [(1, "a"), (5, "b"), (9, "c")] {
            index.insert(&Value::Int(n), id(name));
        }

        let gt = index.lookup_range(Bound::Excluded(&Value::Int(1)), Bound::Unbounded);
        assert_eq!(ids(gt), vec!["b", "c"]);

        let between = index.lookup_range(
            Bound::Included(&Value::Int(1)),
            Bound::Included(&Value::Int(5)),
        );
        assert_eq!(ids(between), vec!["a", "b"]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let mut index = FieldIndex::new();
        index.insert(&Value::Int(3), id("a"));
        assert!(index
            .lookup_range(Bound::Included(&Value::Int(5)), Bound::Included(&Value::Int(1)))
            .is_empty());
        assert!(index
            .lookup_range(Bound::Excluded(&Value::Int(3)), Bound::Included(&Value::Int(3)))
            .is_empty());
    }

    // ========================================
    // CollectionIndexes Tests
    // ========================================

    #[test]
    fn test_create_from_existing_docs() {
        let a = id("a");
        let fa = fields(100);
        let b = id("b");
        let fb = fields(200);

        let mut indexes = CollectionIndexes::new();
        assert!(indexes.create("createdAt", [(&a, &fa), (&b, &fb)]));
        assert!(!indexes.create("createdAt", std::iter::empty()));

        let index = indexes.get("createdAt").unwrap();
        assert_eq!(ids(index.lookup_eq(&Value::Int(200))), vec!["b"]);
    }

    #[test]
    fn test_update_moves_entries() {
        let a = id("a");
        let mut indexes = CollectionIndexes::new();
        indexes.create("createdAt", std::iter::empty());

        indexes.update(&a, None, Some(&fields(1)));
        indexes.update(&a, Some(&fields(1)), Some(&fields(2)));
        let index = indexes.get("createdAt").unwrap();
        assert!(index.lookup_eq(&Value::Int(1)).is_empty());
        assert_eq!(ids(index.lookup_eq(&Value::Int(2))), vec!["a"]);

        indexes.update(&a, Some(&fields(2)), None);
        assert!(indexes.get("createdAt").unwrap().is_empty());
    }
}
