//! Application collections for KipuDB
//!
//! Typed facades over the engine for the app's data:
//! - **NodeCollection**: text, image and file nodes with a live newest-first feed
//! - **AppDatabase**: per-user database bootstrap with the collections registered
//!
//! ## Design Principle: Stateless Facades
//!
//! Facades hold only engine handles and delegate every operation, so
//! multiple instances over the same database are safe and need no
//! warm-up or invalidation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod nodes;

pub use app::{database_dir, AppDatabase};
pub use nodes::{node_schema, nodes_of, AuthorId, Node, NodeCollection, NodeType, NODES};
