//! App Integration Tests
//!
//! End-to-end flows through the public `kipudb` API, organized by what the
//! app does:
//! - Feed: the live newest-first list of nodes
//! - Editing: concurrent text edits on one node
//! - Restart: state surviving close, reopen and compaction

#[path = "../common/mod.rs"]
mod common;

mod editing;
mod feed;
mod restart;
