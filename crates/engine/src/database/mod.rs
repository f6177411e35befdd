//! Database struct and open/close logic
//!
//! This module provides the main Database struct that orchestrates:
//! - Configuration (`kipu.toml`)
//! - Exclusive ownership of the data directory (`.lock`)
//! - WAL replay on startup
//! - Schema registry, query engine, live subscriptions and mutations
//!
//! ## Lifecycle
//!
//! `Database::open` is the explicit init and `Database::close` the explicit
//! teardown. Between them the instance is shared: opening the same path
//! again returns the same `Arc<Database>`.
//!
//! ## On-disk layout
//!
//! ```text
//! <dir>/kipu.toml          configuration
//! <dir>/.lock              exclusive process lock
//! <dir>/wal/current.wal    write-ahead log
//! ```

pub mod config;
mod registry;
mod retry;

pub use config::{KipuConfig, CONFIG_FILE_NAME};
pub use registry::OPEN_DATABASES;
pub use retry::RetryConfig;

use crate::collection::Collection;
use crate::coordinator::MutationCoordinator;
use crate::live::{Subscription, SubscriptionId, SubscriptionManager};
use crate::query::{QueryEngine, Snapshot};
use crate::schema::SchemaRegistry;
use kipu_core::error::{Error, Result};
use kipu_core::{CollectionSchema, Document, DocumentId, Query};
use kipu_durability::{CompactInfo, DurabilityMode};
use kipu_storage::StorageEngine;
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// WAL location relative to the data directory
const WAL_PATH: &str = "wal/current.wal";

// ============================================================================
// Database Struct
// ============================================================================

/// Main database struct
///
/// Create one with `Database::open()` (persistent) or
/// `Database::ephemeral()` (in memory, nothing written to disk).
///
/// # Example
///
/// ```text
/// use kipu_engine::Database;
///
/// let db = Database::open("/path/to/data")?;
/// let nodes = db.register_collection(schema)?;
/// let doc = nodes.insert(fields)?;
/// let mut live = nodes.subscribe(Query::all("nodes"))?;
/// let snapshot = live.blocking_next();
/// db.close()?;
/// ```
pub struct Database {
    /// Canonical data directory, `None` when ephemeral
    data_dir: Option<PathBuf>,
    storage: Arc<StorageEngine>,
    schemas: Arc<SchemaRegistry>,
    queries: Arc<QueryEngine>,
    live: Arc<SubscriptionManager>,
    mutations: MutationCoordinator,
    config: RwLock<KipuConfig>,
    closed: AtomicBool,
    /// Background WAL flush for standard durability
    flush_shutdown: Arc<AtomicBool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    /// Held for the lifetime of the instance; dropping it releases the lock
    lock_file: Mutex<Option<File>>,
}

impl Database {
    /// Open database at the given path
    ///
    /// Creates the directory and a default `kipu.toml` if needed, then
    /// reads the configuration from `kipu.toml`.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<Database>)` - Ready-to-use database instance (shared if path was already open)
    /// * `Err` - If config is invalid, the directory is locked by another
    ///   process, or WAL replay fails
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        KipuConfig::write_default_if_missing(&config_path)?;
        let cfg = KipuConfig::from_file(&config_path)?;

        Self::open_internal(&data_dir, cfg)
    }

    /// Open database at the given path with an explicit configuration
    ///
    /// The supplied config is written to `kipu.toml` so that subsequent
    /// `Database::open()` calls pick up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(path: P, cfg: KipuConfig) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        cfg.validate()?;
        cfg.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;
        Self::open_internal(&data_dir, cfg)
    }

    fn open_internal(data_dir: &Path, cfg: KipuConfig) -> Result<Arc<Self>> {
        let mode = cfg.durability_mode()?;
        let canonical_path = data_dir.canonicalize()?;

        // Held across the whole open so two threads can't both create an instance
        let mut registry = OPEN_DATABASES.lock();
        if let Some(db) = registry.get(&canonical_path).and_then(|weak| weak.upgrade()) {
            info!(target: "kipu::db", path = ?canonical_path, "Returning existing database instance");
            return Ok(db);
        }

        let lock_path = canonical_path.join(".lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            Error::StorageError(format!(
                "database at '{}' is already in use by another process",
                canonical_path.display()
            ))
        })?;

        let (storage, stats) = StorageEngine::open(canonical_path.join(WAL_PATH), mode)?;
        info!(
            target: "kipu::db",
            path = ?canonical_path,
            records = stats.records_replayed,
            puts = stats.puts,
            deletes = stats.deletes,
            truncated_bytes = stats.truncated_bytes,
            "Recovery complete"
        );

        let db = Arc::new(Self::assemble(
            Some(canonical_path.clone()),
            storage,
            cfg,
            Some(lock_file),
        ));
        if let Err(e) = db.start_flush_thread(mode) {
            // Dropping `db` deregisters, which needs the registry lock
            drop(registry);
            return Err(e);
        }

        registry.insert(canonical_path.clone(), Arc::downgrade(&db));
        info!(target: "kipu::db", path = ?canonical_path, %mode, "Database opened");
        Ok(db)
    }

    /// Create an in-memory database
    ///
    /// - Creates no files or directories
    /// - Is NOT registered in the global registry (each call creates a new instance)
    /// - Loses all data when dropped
    pub fn ephemeral() -> Result<Arc<Self>> {
        Ok(Arc::new(Self::assemble(
            None,
            StorageEngine::in_memory(),
            KipuConfig::default(),
            None,
        )))
    }

    fn assemble(
        data_dir: Option<PathBuf>,
        storage: StorageEngine,
        cfg: KipuConfig,
        lock_file: Option<File>,
    ) -> Self {
        let storage = Arc::new(storage);
        let schemas = Arc::new(SchemaRegistry::new());
        let queries = Arc::new(QueryEngine::new(Arc::clone(&storage), Arc::clone(&schemas)));
        let live = SubscriptionManager::new(Arc::clone(&queries));
        let mutations = MutationCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&schemas),
            Arc::clone(&live),
            cfg.retry(),
        );

        Database {
            data_dir,
            storage,
            schemas,
            queries,
            live,
            mutations,
            config: RwLock::new(cfg),
            closed: AtomicBool::new(false),
            flush_shutdown: Arc::new(AtomicBool::new(false)),
            flush_handle: Mutex::new(None),
            lock_file: Mutex::new(lock_file),
        }
    }

    /// Spawn the periodic WAL sync for standard durability
    fn start_flush_thread(&self, mode: DurabilityMode) -> Result<()> {
        let DurabilityMode::Standard { interval_ms, .. } = mode else {
            return Ok(());
        };
        let storage = Arc::clone(&self.storage);
        let shutdown = Arc::clone(&self.flush_shutdown);
        let interval = std::time::Duration::from_millis(interval_ms);

        let handle = std::thread::Builder::new()
            .name("kipu-wal-flush".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(e) = storage.flush() {
                        warn!(target: "kipu::wal", error = %e, "Background WAL sync failed");
                    }
                }
            })
            .map_err(|e| Error::StorageError(format!("failed to spawn WAL flush thread: {}", e)))?;
        *self.flush_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop_flush_thread(&self) {
        self.flush_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Data directory, `None` for an ephemeral database
    pub fn path(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Whether the database writes to disk
    pub fn is_persistent(&self) -> bool {
        self.data_dir.is_some()
    }

    /// Configuration the database was opened with
    pub fn config(&self) -> KipuConfig {
        self.config.read().clone()
    }

    /// Replace the update retry policy for this instance
    pub fn set_retry_config(&self, retry: RetryConfig) {
        {
            let mut cfg = self.config.write();
            cfg.max_retries = retry.max_retries;
            cfg.retry_base_delay_ms = retry.base_delay_ms;
            cfg.retry_max_delay_ms = retry.max_delay_ms;
        }
        self.mutations.set_retry_config(retry);
    }

    /// Check if the database accepts writes
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Declare a collection
    ///
    /// Idempotent for an identical schema; a different schema under an
    /// existing name is `SchemaConflict`. Builds indexes for the schema's
    /// indexed fields over any documents already stored.
    pub fn register_collection(self: &Arc<Self>, schema: CollectionSchema) -> Result<Collection> {
        let schema = self.schemas.register(schema)?;
        for field in schema.indexed_fields() {
            self.storage.ensure_index(schema.name(), field);
        }
        Ok(Collection::new(Arc::clone(self), schema))
    }

    /// Handle to a registered collection
    pub fn collection(self: &Arc<Self>, name: &str) -> Result<Collection> {
        let schema = self.schemas.get(name)?;
        Ok(Collection::new(Arc::clone(self), schema))
    }

    /// Registered collection names
    pub fn collection_names(&self) -> Vec<String> {
        self.schemas.names()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Evaluate a query once
    pub fn find(&self, query: &Query) -> Result<Snapshot> {
        self.queries.evaluate(query)
    }

    /// Document by id, `None` if absent or removed
    pub fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        self.queries.find_one(collection, id)
    }

    /// Number of documents a query returns
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.queries.count(query)
    }

    /// Start a live query
    pub fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.live.subscribe(query)
    }

    /// Stop a live query by id while its handle stays alive
    ///
    /// Snapshots already queued on the handle remain readable; nothing is
    /// queued after this returns. Returns false if it was not active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.live.unsubscribe(id)
    }

    /// Number of active live queries
    pub fn active_subscriptions(&self) -> usize {
        self.live.active_count()
    }

    // ========================================================================
    // Maintenance & Lifecycle
    // ========================================================================

    /// Rewrite the WAL as one record per document
    ///
    /// `None` for an ephemeral database.
    pub fn compact(&self) -> Result<Option<CompactInfo>> {
        let info = self.storage.compact()?;
        if let Some(info) = &info {
            info!(
                target: "kipu::db",
                reclaimed_bytes = info.reclaimed_bytes(),
                records = info.records_written,
                "Compaction complete"
            );
        }
        Ok(info)
    }

    /// Force buffered WAL writes to disk
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    /// Close the database
    ///
    /// Ends every live query, flushes the WAL, rejects further writes with
    /// `Closed`, releases the directory lock and leaves the process
    /// registry, so the path can be opened again. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.live.close();
        self.stop_flush_thread();
        let result = self.storage.close();

        if let Some(path) = &self.data_dir {
            registry::deregister(path, self as *const Database);
        }
        drop(self.lock_file.lock().take());

        info!(target: "kipu::db", path = ?self.data_dir, "Database closed");
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "kipu::db", error = %e, "Error closing database on drop");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
