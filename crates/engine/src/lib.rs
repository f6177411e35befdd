//! Database engine for KipuDB
//!
//! This crate orchestrates all lower layers:
//! - Database: open / ephemeral / close, configuration, process registry
//! - SchemaRegistry: declared collection schemas and field validation
//! - QueryEngine: filter, sort and paginate over consistent snapshots
//! - SubscriptionManager: live queries pushed over per-subscription channels
//! - MutationCoordinator: inserts, updates and removes with optimistic
//!   concurrency and bounded retry
//!
//! The engine is the only component that knows about:
//! - Schemas (storage stores whatever it is given)
//! - Which live queries a commit affects

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod coordinator;
pub mod database;
pub mod live;
pub mod query;
pub mod schema;

pub use collection::Collection;
pub use coordinator::{Changes, MutationCoordinator};
pub use database::{Database, KipuConfig, RetryConfig, CONFIG_FILE_NAME};
pub use live::{Subscription, SubscriptionId, SubscriptionManager};
pub use query::{QueryEngine, Snapshot};
pub use schema::SchemaRegistry;
