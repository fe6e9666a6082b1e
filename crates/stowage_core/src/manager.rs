//! The persistence manager: a directory of stores.

use crate::config::{Heartbeat, ManagerConfig};
use crate::error::{PersistenceError, PersistenceResult};
use crate::managed::ManagedStore;
use crate::metadata::{StoreMetadata, META_FILENAME};
use crate::store::PersistentStore;
use crate::stream::{self, StreamStats};
use crate::tools::PersistenceTools;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stowage_engine::LOCK_FILE;

/// Id of the singleton active store.
pub const ACTIVE_STORE_ID: &str = "active";

/// Id of the singleton events store.
pub const EVENTS_STORE_ID: &str = "events";

/// Owns a directory holding one sub-directory per store.
///
/// Stores are opened on demand and stay open until closed, deleted or the
/// manager is released. Opening distinct stores from several threads is
/// safe; threads racing to open the same store wait for one open.
///
/// # Example
///
/// ```rust,no_run
/// use stowage_core::{ManagerConfig, PersistenceManager, PersistentStore};
///
/// let manager = PersistenceManager::new(ManagerConfig::new("data"))?;
/// let store = manager.open_store("orders")?;
/// store.create_extent(1)?;
///
/// let mut txn = store.begin()?;
/// store.store(1, b"o-1", b"pending", Some(&mut txn))?;
/// store.store(1, b"o-2", b"shipped", Some(&mut txn))?;
/// store.commit(txn)?;
///
/// manager.create_snapshot("snapshots/nightly".as_ref())?;
/// # Ok::<(), stowage_core::PersistenceError>(())
/// ```
#[derive(Debug)]
pub struct PersistenceManager {
    config: ManagerConfig,
    gate: RwLock<()>,
    stores: Mutex<HashMap<String, Arc<ManagedStore>>>,
    events: Mutex<Option<Arc<ManagedStore>>>,
    released: AtomicBool,
}

impl PersistenceManager {
    /// Creates a manager over `config.data_dir`.
    ///
    /// A writable manager creates its directory; a read-only one requires
    /// it to exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or is missing.
    pub fn new(config: ManagerConfig) -> PersistenceResult<Self> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(PersistenceError::configuration("data directory is empty"));
        }
        if config.read_only {
            if !config.data_dir.is_dir() {
                return Err(PersistenceError::invalid_argument(format!(
                    "directory does not exist: {}",
                    config.data_dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&config.data_dir).map_err(|e| {
                PersistenceError::io(format!("error creating {}", config.data_dir.display()), e)
            })?;
        }

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            name = config.name.as_deref().unwrap_or(""),
            read_only = config.read_only,
            "persistence manager created"
        );
        Ok(Self {
            config,
            gate: RwLock::new(()),
            stores: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// The manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Directory holding the stores.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Snapshot name, for managers opened over a snapshot.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    /// Returns `true` if every store is opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    fn ensure_active(&self) -> PersistenceResult<()> {
        if self.released.load(Ordering::Acquire) {
            Err(PersistenceError::Released { what: "manager" })
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> PersistenceResult<()> {
        self.ensure_active()?;
        if self.config.read_only {
            return Err(PersistenceError::invalid_argument(format!(
                "manager over {} is read-only",
                self.config.data_dir.display()
            )));
        }
        Ok(())
    }

    fn instantiate(&self, id: &str, dir: PathBuf) -> ManagedStore {
        ManagedStore::new(
            self.config
                .engine
                .instantiate(id, dir, self.config.store_options()),
        )
    }

    /// Returns the tracked store for `id`, tracking a new unopened one if
    /// needed.
    fn managed(&self, id: &str) -> PersistenceResult<Arc<ManagedStore>> {
        let id = validate_store_id(id)?;
        let mut stores = self.stores.lock();
        let store = stores
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(self.instantiate(id, self.config.data_dir.join(id))));
        Ok(Arc::clone(store))
    }

    // ========================================================================
    // Stores
    // ========================================================================

    /// Opens (creating if needed) the store `id`.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::InvalidArgument`] for an empty or path-like id
    /// - [`PersistenceError::StorageOpen`] if the directory is locked or
    ///   unreadable
    /// - [`PersistenceError::InvalidMetadata`] if an existing store's
    ///   metadata is incomplete or incompatible
    pub fn open_store(&self, id: &str) -> PersistenceResult<Arc<ManagedStore>> {
        self.ensure_active()?;
        let _gate = self.gate.read();
        let store = self.managed(id)?;
        store.open()?;
        Ok(store)
    }

    /// Opens the singleton active store.
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::open_store`].
    pub fn open_active(&self) -> PersistenceResult<Arc<ManagedStore>> {
        self.open_store(ACTIVE_STORE_ID)
    }

    /// Opens the singleton events store, if an events directory is
    /// configured.
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::open_store`].
    pub fn open_events(&self) -> PersistenceResult<Option<Arc<ManagedStore>>> {
        self.ensure_active()?;
        let Some(events_dir) = &self.config.events_dir else {
            return Ok(None);
        };
        let _gate = self.gate.read();
        let store = Arc::clone(self.events.lock().get_or_insert_with(|| {
            Arc::new(self.instantiate(EVENTS_STORE_ID, events_dir.join(EVENTS_STORE_ID)))
        }));
        store.open()?;
        Ok(Some(store))
    }

    /// Creates store `id` as a copy of `source` and opens it.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StoreOpen`] if `id` is open, or the copy
    /// failure; the partial store is removed in that case.
    pub fn open_store_from(
        &self,
        id: &str,
        source: &dyn PersistentStore,
    ) -> PersistenceResult<Arc<ManagedStore>> {
        self.ensure_writable()?;
        let _gate = self.gate.read();
        let store = self.managed(id)?;
        store.copy_and_open_from(source)?;
        tracing::info!(store = %store.id(), source = %source.id(), "store recovered from copy");
        Ok(store)
    }

    /// Releases store `id` and stops tracking it.
    ///
    /// Returns the failures encountered while closing, already logged.
    pub fn close_store(&self, id: &str) -> Vec<PersistenceError> {
        let _gate = self.gate.read();
        let Some(store) = self.stores.lock().remove(id) else {
            return Vec::new();
        };
        store.release()
    }

    /// Deletes store `id`, releasing it first if open.
    ///
    /// With `safe` set and a trash directory configured, a store that has
    /// metadata is moved into the trash instead of being removed. Returns
    /// `false` when there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be moved or removed.
    pub fn delete_store(&self, id: &str, safe: bool) -> PersistenceResult<bool> {
        self.ensure_writable()?;
        let id = validate_store_id(id)?;
        let _gate = self.gate.read();
        let store = self
            .stores
            .lock()
            .remove(id)
            .unwrap_or_else(|| Arc::new(self.instantiate(id, self.config.data_dir.join(id))));

        let dir = store.data_dir().to_path_buf();
        if let (true, Some(trash)) = (safe, &self.config.trash_dir) {
            if dir.join(META_FILENAME).is_file() {
                for error in store.release() {
                    tracing::warn!(store = %id, error = %error, "release before trash move");
                }
                let dest = move_to_trash(&dir, trash, id).map_err(|e| {
                    PersistenceError::io(format!("error moving store {id} to trash"), e)
                })?;
                tracing::info!(store = %id, trash = %dest.display(), "store moved to trash");
                return Ok(true);
            }
        }

        let deleted = store.delete()?;
        if deleted {
            tracing::info!(store = %id, "store deleted");
        }
        Ok(deleted)
    }

    /// Ids of every store directory whose metadata is compatible with this
    /// manager or incomplete, in sorted order.
    ///
    /// Directories with incompatible metadata are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be read.
    pub fn list(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_active()?;
        let engine = self.config.engine;
        let mut ids = Vec::new();
        for (id, dir) in store_dirs(&self.config.data_dir)? {
            match StoreMetadata::read_if_present(&dir)? {
                Some(meta)
                    if meta.is_complete()
                        && !meta.is_compatible(
                            engine.impl_version(),
                            engine.storage_format(),
                            engine.storage_version(),
                        ) =>
                {
                    tracing::warn!(
                        store = %id,
                        path = %dir.display(),
                        "skipping store with incompatible metadata"
                    );
                }
                _ => ids.push(id),
            }
        }
        Ok(ids)
    }

    /// Ids of the stores currently open, in sorted order.
    #[must_use]
    pub fn list_open(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .stores
            .lock()
            .values()
            .filter(|store| store.is_open())
            .map(|store| store.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Exclusive tasks and snapshots
    // ========================================================================

    /// Runs `task` with every data operation on every open store held off.
    ///
    /// The task receives the open stores in id order. Store opens and
    /// closes wait until it finishes. The locks are released on every exit
    /// path, including a panic.
    ///
    /// # Errors
    ///
    /// Returns whatever the task returns.
    pub fn with_exclusive_lock<T>(
        &self,
        task: impl FnOnce(&[&dyn PersistentStore]) -> PersistenceResult<T>,
    ) -> PersistenceResult<T> {
        self.ensure_active()?;
        let _gate = self.gate.write();
        let mut stores: Vec<Arc<ManagedStore>> = self
            .stores
            .lock()
            .values()
            .filter(|store| store.is_open())
            .cloned()
            .collect();
        stores.sort_by(|a, b| a.id().cmp(b.id()));

        let _exclusive: Vec<_> = stores.iter().map(|store| store.exclusive()).collect();
        let inner: Vec<&dyn PersistentStore> = stores.iter().map(|store| store.inner()).collect();
        task(&inner)
    }

    /// Writes a snapshot of every open store into directory `target`.
    ///
    /// For each store, in turn: heartbeat, create `target/<id>`, checkpoint,
    /// create a fresh lock marker, copy the metadata, then back up the
    /// engine. Commits and new transactions wait until the snapshot is done.
    /// A failure aborts the snapshot; stores already copied are left in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Snapshot`] naming the store directory
    /// that failed.
    pub fn create_snapshot(&self, target: &Path) -> PersistenceResult<()> {
        let snapshot = target.display().to_string();
        let heartbeat = self.config.heartbeat.clone();

        let count = self.with_exclusive_lock(|stores| {
            for store in stores {
                if let Some(heartbeat) = &heartbeat {
                    heartbeat.beat();
                }
                let store_dir = target.join(store.id());
                snapshot_store(*store, &store_dir).map_err(|e| PersistenceError::Snapshot {
                    snapshot: snapshot.clone(),
                    store_dir: store_dir.clone(),
                    source: Box::new(e),
                })?;
            }
            Ok(stores.len())
        })?;

        tracing::info!(snapshot = %snapshot, stores = count, "snapshot created");
        Ok(())
    }

    /// Opens a read-only manager over an existing snapshot directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist.
    pub fn open_snapshot(&self, directory: &Path, name: &str) -> PersistenceResult<Self> {
        self.ensure_active()?;
        let mut config = ManagerConfig::new(directory)
            .name(name)
            .engine(self.config.engine)
            .read_only(true);
        config.heartbeat = self.config.heartbeat.clone();
        Self::new(config)
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Writes the contents of store `id` (opening it if needed) to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or written.
    pub fn write_store(&self, id: &str, out: &mut dyn Write) -> PersistenceResult<StreamStats> {
        let store = self.open_store(id)?;
        stream::write_store(store.as_ref(), out, self.config.heartbeat.as_ref())
    }

    /// Creates store `id` from a stream.
    ///
    /// The store is held exclusively for the whole import; other callers
    /// that open it meanwhile wait for the import to finish.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StoreOpen`] if `id` is open and
    /// [`PersistenceError::Stream`] for a malformed stream. The store is
    /// deleted if the import fails.
    pub fn read_store(&self, id: &str, input: &mut dyn Read) -> PersistenceResult<StreamStats> {
        self.ensure_writable()?;
        let gate = self.gate.write();
        let store = self.managed(id)?;
        if store.is_open() {
            return Err(PersistenceError::StoreOpen {
                store_id: store.id().to_string(),
            });
        }
        store.open()?;
        let exclusive = store.exclusive();
        drop(gate);

        let result = stream::read_store(store.inner(), input);
        drop(exclusive);
        match result {
            Ok(stats) => {
                tracing::info!(store = %id, entries = stats.entries, "store imported from stream");
                Ok(stats)
            }
            Err(error) => {
                if let Err(e) = self.delete_store(id, false) {
                    tracing::warn!(store = %id, error = %e, "failed to remove partial import");
                }
                Err(error)
            }
        }
    }

    // ========================================================================
    // Tools and release
    // ========================================================================

    /// Offline tools over this manager's directory.
    #[must_use]
    pub fn persistence_tools(&self) -> PersistenceTools {
        PersistenceTools::new(
            self.config.data_dir.clone(),
            self.config.engine,
            self.config.heartbeat.clone(),
        )
    }

    /// Checks that the given stores agree on implementation and storage
    /// versions.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::MetadataInconsistent`] naming the first
    /// store that disagrees.
    pub fn validate_consistency(&self, guids: &[String]) -> PersistenceResult<()> {
        self.persistence_tools().validate_consistency(guids)
    }

    /// The heartbeat callback, if configured.
    #[must_use]
    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.config.heartbeat.as_ref()
    }

    /// Releases every store. Further use of the manager fails with
    /// [`PersistenceError::Released`].
    ///
    /// Returns the failures encountered, already logged. Idempotent.
    pub fn release(&self) -> Vec<PersistenceError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let _gate = self.gate.write();
        let stores: Vec<_> = self.stores.lock().drain().map(|(_, store)| store).collect();
        let events = self.events.lock().take();

        let errors: Vec<_> = stores
            .iter()
            .chain(events.iter())
            .flat_map(|store| store.release())
            .collect();
        tracing::debug!(
            data_dir = %self.config.data_dir.display(),
            stores = stores.len(),
            failures = errors.len(),
            "persistence manager released"
        );
        errors
    }
}

/// Copies one store into its snapshot directory.
fn snapshot_store(store: &dyn PersistentStore, store_dir: &Path) -> PersistenceResult<()> {
    fs::create_dir_all(store_dir).map_err(|e| {
        PersistenceError::io(format!("error creating {}", store_dir.display()), e)
    })?;
    store.checkpoint()?;

    let marker = store_dir.join(LOCK_FILE);
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(PersistenceError::AlreadyExists { path: marker })
        }
        Err(e) => {
            return Err(PersistenceError::io(
                format!("error creating {}", marker.display()),
                e,
            ))
        }
    }

    StoreMetadata::copy(store.data_dir(), store_dir)?;
    store.backup_to(store_dir)
}

/// Rejects ids that are empty or would escape the data directory.
pub(crate) fn validate_store_id(id: &str) -> PersistenceResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(PersistenceError::invalid_argument("store id is empty"));
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(PersistenceError::invalid_argument(format!(
            "store id {id:?} is not a plain name"
        )));
    }
    Ok(id)
}

/// Sub-directories of `dir` as `(name, path)`, sorted by name. A missing
/// directory has none.
pub(crate) fn store_dirs(dir: &Path) -> PersistenceResult<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(PersistenceError::io(
                format!("error listing {}", dir.display()),
                e,
            ))
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| PersistenceError::io(format!("error listing {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => dirs.push((name, path)),
            Err(name) => tracing::warn!(name = ?name, "skipping directory with non UTF-8 name"),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Moves `dir` into `trash` under `name`, adding a numeric suffix if that
/// name is taken. Returns the new location.
pub(crate) fn move_to_trash(dir: &Path, trash: &Path, name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(trash)?;
    let mut dest = trash.join(name);
    let mut suffix = 1u32;
    while dest.exists() {
        dest = trash.join(format!("{name}.{suffix}"));
        suffix += 1;
    }
    fs::rename(dir, &dest)?;
    Ok(dest)
}
