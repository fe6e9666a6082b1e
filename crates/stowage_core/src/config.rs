//! Manager and environment configuration.

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::journal::JournalStore;
use crate::store::PersistentStore;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use stowage_engine::{ENGINE_FORMAT, ENGINE_FORMAT_VERSION};

/// Default active directory name under a base directory.
pub const DEFAULT_ACTIVE_DIR: &str = "active";

/// Default snapshot root directory name under a base directory.
pub const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";

/// Default trash directory name under a base directory.
pub const DEFAULT_TRASH_DIR: &str = "trash";

/// Entries visited between heartbeats during bulk iteration.
pub const HEARTBEAT_INTERVAL: u64 = 1024;

/// Liveness callback invoked during long-running operations.
///
/// Snapshot creation and statistics collection call it once per store;
/// bulk iteration calls it every [`HEARTBEAT_INTERVAL`] entries.
#[derive(Clone)]
pub struct Heartbeat(Arc<dyn Fn() + Send + Sync>);

impl Heartbeat {
    /// Wraps a callback.
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invokes the callback.
    pub fn beat(&self) {
        (self.0)();
    }
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Heartbeat(..)")
    }
}

/// Per-store engine options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Open the engine read-only.
    pub read_only: bool,
    /// Sync the journal on every commit.
    pub sync_on_commit: bool,
    /// Journal size that triggers automatic compaction (0 = never).
    pub auto_checkpoint_bytes: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            sync_on_commit: true,
            auto_checkpoint_bytes: 0,
        }
    }
}

/// The embedded engine backing a manager's stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// The `stowage_engine` journal engine.
    #[default]
    Journal,
}

impl EngineKind {
    /// Every supported engine.
    pub const ALL: [Self; 1] = [Self::Journal];

    /// The engine's storage format tag, as written to metadata.
    #[must_use]
    pub const fn storage_format(self) -> &'static str {
        match self {
            Self::Journal => ENGINE_FORMAT,
        }
    }

    /// The engine's storage version.
    #[must_use]
    pub const fn storage_version(self) -> u32 {
        match self {
            Self::Journal => ENGINE_FORMAT_VERSION,
        }
    }

    /// The adapter's implementation version.
    #[must_use]
    pub const fn impl_version(self) -> u32 {
        match self {
            Self::Journal => 0,
        }
    }

    /// Looks up the engine writing `format`.
    #[must_use]
    pub fn from_storage_format(format: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.storage_format() == format)
    }

    /// Creates an unopened store of this kind.
    #[must_use]
    pub fn instantiate(
        self,
        store_id: &str,
        data_dir: PathBuf,
        options: StoreOptions,
    ) -> Box<dyn PersistentStore> {
        match self {
            Self::Journal => Box::new(JournalStore::new(store_id, data_dir, options)),
        }
    }
}

/// Configuration of a [`crate::PersistenceManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory holding one sub-directory per store.
    pub data_dir: PathBuf,
    /// Where safely deleted stores are moved.
    pub trash_dir: Option<PathBuf>,
    /// Directory of the singleton events store.
    pub events_dir: Option<PathBuf>,
    /// Snapshot name, for managers opened over a snapshot.
    pub name: Option<String>,
    /// Engine backing the stores.
    pub engine: EngineKind,
    /// Open every store read-only and skip metadata writes.
    pub read_only: bool,
    /// Sync the journal on every commit.
    pub sync_on_commit: bool,
    /// Journal size that triggers automatic compaction (0 = never).
    pub auto_checkpoint_bytes: u64,
    /// Liveness callback for long operations.
    pub heartbeat: Option<Heartbeat>,
}

impl ManagerConfig {
    /// Configuration for a writable manager over `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            trash_dir: None,
            events_dir: None,
            name: None,
            engine: EngineKind::default(),
            read_only: false,
            sync_on_commit: true,
            auto_checkpoint_bytes: 0,
            heartbeat: None,
        }
    }

    /// Sets the trash directory.
    #[must_use]
    pub fn trash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trash_dir = Some(dir.into());
        self
    }

    /// Sets the events directory.
    #[must_use]
    pub fn events_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.events_dir = Some(dir.into());
        self
    }

    /// Sets the snapshot name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the engine.
    #[must_use]
    pub const fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn auto_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.auto_checkpoint_bytes = bytes;
        self
    }

    /// Sets the heartbeat callback.
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub(crate) fn store_options(&self) -> StoreOptions {
        StoreOptions {
            read_only: self.read_only,
            sync_on_commit: self.sync_on_commit,
            auto_checkpoint_bytes: self.auto_checkpoint_bytes,
        }
    }
}

/// Configuration of a [`crate::PersistenceEnvironment`].
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Directory of the active manager.
    pub active_dir: PathBuf,
    /// Root under which each snapshot gets a directory.
    pub snapshot_dir: PathBuf,
    /// Where deleted stores and snapshots are moved.
    pub trash_dir: Option<PathBuf>,
    /// Directory of the events store.
    pub events_dir: Option<PathBuf>,
    /// Engine backing every manager.
    pub engine: EngineKind,
    /// Sync the journal on every commit.
    pub sync_on_commit: bool,
    /// Liveness callback for long operations.
    pub heartbeat: Option<Heartbeat>,
}

impl EnvironmentConfig {
    /// Configuration with explicit active and snapshot directories.
    #[must_use]
    pub fn new(active_dir: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            active_dir: active_dir.into(),
            snapshot_dir: snapshot_dir.into(),
            trash_dir: None,
            events_dir: None,
            engine: EngineKind::default(),
            sync_on_commit: true,
            heartbeat: None,
        }
    }

    /// The default layout under `base`: `active/`, `snapshots/`, `trash/`.
    #[must_use]
    pub fn from_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(base.join(DEFAULT_ACTIVE_DIR), base.join(DEFAULT_SNAPSHOT_DIR))
            .trash_dir(base.join(DEFAULT_TRASH_DIR))
    }

    /// Sets the trash directory.
    #[must_use]
    pub fn trash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trash_dir = Some(dir.into());
        self
    }

    /// Sets the events directory.
    #[must_use]
    pub fn events_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.events_dir = Some(dir.into());
        self
    }

    /// Sets the engine.
    #[must_use]
    pub const fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the heartbeat callback.
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Checks that all configured directories are pairwise distinct.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Configuration`] naming the first clash.
    pub fn validate(&self) -> PersistenceResult<()> {
        let mut dirs: Vec<(&str, &Path)> = vec![
            ("active", self.active_dir.as_path()),
            ("snapshot", self.snapshot_dir.as_path()),
        ];
        if let Some(trash) = &self.trash_dir {
            dirs.push(("trash", trash.as_path()));
        }
        if let Some(events) = &self.events_dir {
            dirs.push(("events", events.as_path()));
        }

        for (i, (name_a, a)) in dirs.iter().enumerate() {
            for (name_b, b) in &dirs[i + 1..] {
                if normalize(a) == normalize(b) {
                    return Err(PersistenceError::configuration(format!(
                        "the {name_a} and {name_b} directories must differ: {}",
                        a.display()
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn manager_config(&self, data_dir: PathBuf) -> ManagerConfig {
        let mut config = ManagerConfig::new(data_dir)
            .engine(self.engine)
            .sync_on_commit(self.sync_on_commit);
        config.trash_dir = self.trash_dir.clone();
        config.heartbeat = self.heartbeat.clone();
        config
    }
}

/// Lexically normalises a path, resolving `.` and `..` without touching
/// the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
