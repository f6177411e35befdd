//! Query descriptions and value ordering
//!
//! A [`Query`] is an immutable description: collection, filter predicate,
//! optional sort, skip and limit. It is re-evaluated, never mutated.
//!
//! ## Ordering
//!
//! Sorting and range predicates share one total order over values:
//!
//! ```text
//! Null < Bool < Number < String < Bytes < Array < Object
//! ```
//!
//! Numbers compare numerically across `Int` and `Float`. Range predicates
//! (`Gt`, `Lt`, ...) only match values of the same class as the operand, so
//! `createdAt > 5` never matches a string. Documents missing the sort field
//! order before all present values in ascending order. Ties are always broken
//! by document id ascending, whatever the sort direction.

use crate::types::{Document, ID_FIELD};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact comparison of an integer against a float
///
/// Casting a large `i64` to `f64` rounds, so the float is truncated into the
/// integer domain instead and its fraction settles ties.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, the first float past i64::MAX
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return cmp_f64(0.0, f);
    }
    if f >= I64_END {
        return Ordering::Less;
    }
    if f < -I64_END {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    i.cmp(&(whole as i64)).then_with(|| cmp_f64(whole, f))
}

/// Total order over values used by sorting, range predicates and indexes
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(x), Value::Float(y)) => cmp_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => cmp_int_float(*y, *x).reverse(),
        (Value::Float(x), Value::Float(y)) => cmp_f64(*x, *y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Same-class comparison for predicates; `None` if the classes differ
fn compare_same_class(a: &Value, b: &Value) -> Option<Ordering> {
    if type_rank(a) == type_rank(b) {
        Some(compare_values(a, b))
    } else {
        None
    }
}

/// Filter over a document's fields
///
/// Paths are top-level field names, or `id` for the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every document
    All,
    /// Field equals value (numbers compare across Int/Float)
    Eq(String, Value),
    /// Field is absent or differs from value
    Ne(String, Value),
    /// Field is greater than value
    Gt(String, Value),
    /// Field is greater than or equal to value
    Gte(String, Value),
    /// Field is less than value
    Lt(String, Value),
    /// Field is less than or equal to value
    Lte(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
    /// Field is present
    Exists(String),
    /// All sub-predicates match
    And(Vec<Predicate>),
    /// At least one sub-predicate matches
    Or(Vec<Predicate>),
    /// Sub-predicate does not match
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne(field.into(), value.into())
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(field.into(), value.into())
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gte(field.into(), value.into())
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(field.into(), value.into())
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lte(field.into(), value.into())
    }

    /// `field in values`
    pub fn is_in(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Predicate::In(field.into(), values.into_iter().collect())
    }

    /// `field` is present
    pub fn exists(field: impl Into<String>) -> Self {
        Predicate::Exists(field.into())
    }

    /// Conjunction with another predicate
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut ps), Predicate::And(qs)) => {
                ps.extend(qs);
                Predicate::And(ps)
            }
            (Predicate::And(mut ps), q) => {
                ps.push(q);
                Predicate::And(ps)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    /// Disjunction with another predicate
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(vec![self, other])
    }

    /// Negation
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        let cmp = |field: &str, value: &Value| {
            doc.lookup(field)
                .and_then(|v| compare_same_class(v.as_ref(), value))
        };

        match self {
            Predicate::All => true,
            Predicate::Eq(f, v) => cmp(f, v) == Some(Ordering::Equal),
            Predicate::Ne(f, v) => cmp(f, v) != Some(Ordering::Equal),
            Predicate::Gt(f, v) => cmp(f, v) == Some(Ordering::Greater),
            Predicate::Gte(f, v) => matches!(cmp(f, v), Some(Ordering::Greater | Ordering::Equal)),
            Predicate::Lt(f, v) => cmp(f, v) == Some(Ordering::Less),
            Predicate::Lte(f, v) => matches!(cmp(f, v), Some(Ordering::Less | Ordering::Equal)),
            Predicate::In(f, vs) => vs.iter().any(|v| cmp(f, v) == Some(Ordering::Equal)),
            Predicate::Exists(f) => doc.lookup(f).is_some(),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(doc)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(doc)),
            Predicate::Not(p) => !p.matches(doc),
        }
    }

    /// Every field path this predicate reads
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::All => {}
            Predicate::Eq(f, _)
            | Predicate::Ne(f, _)
            | Predicate::Gt(f, _)
            | Predicate::Gte(f, _)
            | Predicate::Lt(f, _)
            | Predicate::Lte(f, _)
            | Predicate::In(f, _)
            | Predicate::Exists(f) => out.push(f),
            Predicate::And(ps) | Predicate::Or(ps) => {
                for p in ps {
                    p.collect_fields(out);
                }
            }
            Predicate::Not(p) => p.collect_fields(out),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Sort key and direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Field path to sort by
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

/// Immutable query over one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    collection: String,
    predicate: Predicate,
    sort: Option<Sort>,
    skip: usize,
    limit: Option<usize>,
}

impl Query {
    /// Start building a query over `collection`
    pub fn collection(collection: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            query: Query {
                collection: collection.into(),
                predicate: Predicate::All,
                sort: None,
                skip: 0,
                limit: None,
            },
        }
    }

    /// Every document in `collection`, ordered by id
    pub fn all(collection: impl Into<String>) -> Self {
        Self::collection(collection).build()
    }

    /// Target collection
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Filter predicate
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Sort, if any (otherwise id ascending)
    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    /// Number of leading results skipped
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// Maximum number of results
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Check a document against the predicate
    pub fn matches(&self, doc: &Document) -> bool {
        self.predicate.matches(doc)
    }

    /// Result order of two documents
    pub fn order(&self, a: &Document, b: &Document) -> Ordering {
        let by_key = match &self.sort {
            None => Ordering::Equal,
            Some(sort) if sort.field == ID_FIELD => match sort.direction {
                SortDirection::Asc => Ordering::Equal,
                SortDirection::Desc => b.id.cmp(&a.id),
            },
            Some(sort) => {
                let ord = match (a.lookup(&sort.field), b.lookup(&sort.field)) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => compare_values(x.as_ref(), y.as_ref()),
                };
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        };
        by_key.then_with(|| a.id.cmp(&b.id))
    }

    /// Every field path the query reads (predicate and sort)
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = self.predicate.fields();
        if let Some(sort) = &self.sort {
            fields.push(&sort.field);
        }
        fields
    }
}

/// Builder for [`Query`]
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Add a filter (conjoined with any existing filter)
    pub fn filter(mut self, predicate: Predicate) -> Self {
        let current = std::mem::replace(&mut self.query.predicate, Predicate::All);
        self.query.predicate = current.and(predicate);
        self
    }

    /// Sort ascending by a field
    pub fn sort_asc(self, field: impl Into<String>) -> Self {
        self.sort_by(field, SortDirection::Asc)
    }

    /// Sort descending by a field
    pub fn sort_desc(self, field: impl Into<String>) -> Self {
        self.sort_by(field, SortDirection::Desc)
    }

    /// Sort by a field in a direction
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Skip the first `n` results
    pub fn skip(mut self, n: usize) -> Self {
        self.query.skip = n;
        self
    }

    /// Return at most `n` results
    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    /// Finish the query
    pub fn build(self) -> Query {
        self.query
    }
}
