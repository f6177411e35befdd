//! KipuDB - Embedded reactive document store with live queries
//!
//! KipuDB stores schema-checked documents in named collections, keeps every
//! write durable in a checksummed write-ahead log, and pushes fresh query
//! results to subscribers whenever a commit changes them.
//!
//! # Quick Start
//!
//! ```ignore
//! use kipudb::{AppDatabase, AuthorId};
//!
//! let app = AppDatabase::create(data_root, "alice")?;
//! let mut feed = app.nodes().newest_first()?;
//!
//! let node = app.nodes().init_text_node("hello", &AuthorId::from("alice"))?;
//! app.nodes().set_text(node.id(), "hello, world")?;
//!
//! while let Some(snapshot) = feed.try_next() {
//!     println!("{} nodes at version {}", snapshot.len(), snapshot.version);
//! }
//! ```
//!
//! # Architecture
//!
//! - `kipu-core`: values, documents, schemas, queries, errors
//! - `kipu-durability`: WAL framing, recovery, compaction
//! - `kipu-storage`: versioned collections, secondary indexes, commit log
//! - `kipu-engine`: database lifecycle, mutations, live subscriptions
//! - `kipu-primitives`: the app's typed collections

pub use kipu_core::{
    CollectionSchema, Document, DocumentId, Error, FieldType, Fields, Predicate, Query,
    QueryBuilder, Result, Revision, SchemaViolation, SortDirection, Value,
};
pub use kipu_engine::{
    Changes, Collection, Database, KipuConfig, RetryConfig, Snapshot, Subscription,
    SubscriptionId,
};
pub use kipu_primitives::{
    database_dir, node_schema, nodes_of, AppDatabase, AuthorId, Node, NodeCollection, NodeType,
};
