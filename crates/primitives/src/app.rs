//! App bootstrap: one database per user with the app's collections
//!
//! Each user gets `<root>/<username>_db2`, opened through the process-wide
//! registry so every screen of the app shares one instance.

use crate::nodes::NodeCollection;
use kipu_core::error::{Error, Result};
use kipu_engine::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Directory suffix for per-user databases
const DB_SUFFIX: &str = "_db2";

/// Data directory for `username` under `root`
///
/// Usernames must be non-empty and must not contain path separators.
pub fn database_dir(root: &Path, username: &str) -> Result<PathBuf> {
    if username.is_empty()
        || username.contains(['/', '\\'])
        || username == "."
        || username == ".."
    {
        return Err(Error::InvalidConfig(format!(
            "invalid username for a database directory: '{}'",
            username
        )));
    }
    Ok(root.join(format!("{}{}", username, DB_SUFFIX)))
}

/// An open app database with its collections registered
#[derive(Clone)]
pub struct AppDatabase {
    db: Arc<Database>,
    nodes: NodeCollection,
}

impl AppDatabase {
    /// Open (or create) the database of `username` under `root`
    pub fn create(root: &Path, username: &str) -> Result<Self> {
        let dir = database_dir(root, username)?;
        let db = Database::open(&dir)?;
        let app = Self::with_database(db)?;
        info!(target: "kipu::db", path = ?dir, "App database ready");
        Ok(app)
    }

    /// In-memory app database
    pub fn ephemeral() -> Result<Self> {
        Self::with_database(Database::ephemeral()?)
    }

    fn with_database(db: Arc<Database>) -> Result<Self> {
        let nodes = NodeCollection::register(&db)?;
        Ok(Self { db, nodes })
    }

    /// The `nodes` collection
    pub fn nodes(&self) -> &NodeCollection {
        &self.nodes
    }

    /// Underlying database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Close the database; every handle to it stops accepting writes
    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}
