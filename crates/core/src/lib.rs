//! Core types for KipuDB
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified value enum for document fields
//! - DocumentId / Revision / Document: the stored unit and its write generation
//! - CollectionSchema / FieldType: declared field types, required and indexed sets
//! - Query / Predicate / Sort: immutable query descriptions and value ordering
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod query;
pub mod schema;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use query::{compare_values, Predicate, Query, QueryBuilder, Sort, SortDirection};
pub use schema::{CollectionSchema, FieldType, SchemaBuilder, SchemaViolation};
pub use types::{Document, DocumentId, Fields, Revision, ID_FIELD};
pub use value::Value;
