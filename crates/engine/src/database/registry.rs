//! Process-wide registry of open databases
//!
//! Opening the same directory twice in one process returns the same
//! `Database`, so two instances never append to one WAL. Entries are weak;
//! a database leaves the registry on close or when its last handle drops.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use super::Database;

/// Global registry of open databases (canonical path -> weak reference)
pub static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Remove the entry for `path` if it still refers to `db` (or to nothing)
pub(crate) fn deregister(path: &Path, db: *const Database) {
    let mut registry = OPEN_DATABASES.lock();
    let stale = registry
        .get(path)
        .map(|weak| weak.as_ptr() == db || weak.strong_count() == 0)
        .unwrap_or(false);
    if stale {
        registry.remove(path);
    }
}
