//! Shared test utilities for the root integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use kipudb::{AppDatabase, KipuConfig};
use std::path::Path;
use std::sync::Once;
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness; filter with `RUST_LOG`
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config with periodic instead of per-commit fsync
pub fn standard_config() -> KipuConfig {
    KipuConfig {
        durability: "standard".to_string(),
        ..KipuConfig::default()
    }
}

// ============================================================================
// TestApp - app database in a temporary root
// ============================================================================

/// App database for one user under a temporary root directory
pub struct TestApp {
    pub app: AppDatabase,
    pub root: TempDir,
    pub user: String,
}

impl TestApp {
    /// Fresh root, user `alice`
    pub fn new() -> Self {
        init_tracing();
        let root = TempDir::new().expect("temp dir");
        let app = AppDatabase::create(root.path(), "alice").expect("create app database");
        TestApp {
            app,
            root,
            user: "alice".to_string(),
        }
    }

    /// Close and open the same user's database again
    pub fn reopen(&mut self) {
        self.app.close().expect("close");
        self.app = AppDatabase::create(self.root.path(), &self.user).expect("reopen");
    }

    /// Root directory holding per-user databases
    pub fn root(&self) -> &Path {
        self.root.path()
    }
}
