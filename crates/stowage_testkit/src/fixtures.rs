//! Test fixtures and manager helpers.
//!
//! Provides convenience functions for setting up managers and environments
//! in temporary directories, plus a few pre-populated scenarios.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::{
    EnvironmentConfig, ManagedStore, ManagerConfig, PersistenceEnvironment, PersistenceManager,
    PersistentStore,
};
use tempfile::TempDir;

/// A persistence manager over a temporary directory.
///
/// The manager is released before the directory is removed.
pub struct TempManager {
    /// The manager instance.
    pub manager: PersistenceManager,
    temp_dir: TempDir,
}

impl TempManager {
    /// Creates a writable manager over `<tmp>/data` with a trash directory at
    /// `<tmp>/trash`.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ManagerConfig::new(temp_dir.path().join("data"))
            .trash_dir(temp_dir.path().join("trash"));
        Self::with_config(temp_dir, config)
    }

    /// Creates a manager from `config`, keeping `temp_dir` alive with it.
    pub fn with_config(temp_dir: TempDir, config: ManagerConfig) -> Self {
        let manager = PersistenceManager::new(config).expect("Failed to create manager");
        Self { manager, temp_dir }
    }

    /// Root of the temporary directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The trash directory.
    pub fn trash_dir(&self) -> PathBuf {
        self.temp_dir.path().join("trash")
    }

    /// Releases the manager and opens a fresh one over the same directory.
    pub fn reopen(&mut self) {
        self.manager.release();
        let config = self.manager.config().clone();
        self.manager = PersistenceManager::new(config).expect("Failed to reopen manager");
    }
}

impl Default for TempManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempManager {
    type Target = PersistenceManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for TempManager {
    fn drop(&mut self) {
        self.manager.release();
    }
}

/// A persistence environment laid out under a temporary directory.
pub struct TempEnvironment {
    /// The environment instance.
    pub env: PersistenceEnvironment,
    temp_dir: TempDir,
}

impl TempEnvironment {
    /// Creates an environment with `active/`, `snapshots/` and `trash/`
    /// under a new temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let env = PersistenceEnvironment::new(EnvironmentConfig::from_base_dir(temp_dir.path()))
            .expect("Failed to create environment");
        Self { env, temp_dir }
    }

    /// Root of the temporary directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TempEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempEnvironment {
    type Target = PersistenceEnvironment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

impl Drop for TempEnvironment {
    fn drop(&mut self) {
        self.env.release();
    }
}

/// Runs a test with a temporary manager.
///
/// # Example
///
/// ```rust,ignore
/// use stowage_testkit::with_temp_manager;
///
/// #[test]
/// fn my_test() {
///     with_temp_manager(|manager| {
///         let store = manager.open_store("s").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_manager<F, R>(f: F) -> R
where
    F: FnOnce(&PersistenceManager) -> R,
{
    let temp = TempManager::new();
    f(&temp.manager)
}

/// Runs a test with a temporary environment.
pub fn with_temp_environment<F, R>(f: F) -> R
where
    F: FnOnce(&PersistenceEnvironment) -> R,
{
    let temp = TempEnvironment::new();
    f(&temp.env)
}

/// Stores `entries` in `extent` of `store`, creating the extent first, in
/// one transaction.
pub fn fill_extent(store: &dyn PersistentStore, extent: u64, entries: &[(&[u8], &[u8])]) {
    store.create_extent(extent).expect("Failed to create extent");
    let mut txn = store.begin().expect("Failed to begin");
    for (key, value) in entries {
        store
            .store(extent, key, value, Some(&mut txn))
            .expect("Failed to stage entry");
    }
    store.commit(txn).expect("Failed to commit");
}

/// Pre-populated scenarios.
pub mod scenarios {
    use super::*;

    /// Key of entry `i` written by [`populated_store`].
    pub fn scenario_key(i: usize) -> Vec<u8> {
        format!("key-{i:05}").into_bytes()
    }

    /// Value of entry `i` in `extent` written by [`populated_store`].
    pub fn scenario_value(extent: u64, i: usize) -> Vec<u8> {
        format!(r#"{{"extent":{extent},"index":{i}}}"#).into_bytes()
    }

    /// Opens store `id` and fills extents `1..=extent_count` with
    /// `entries_per_extent` entries each.
    pub fn populated_store(
        manager: &PersistenceManager,
        id: &str,
        extent_count: u64,
        entries_per_extent: usize,
    ) -> Arc<ManagedStore> {
        let store = manager.open_store(id).expect("Failed to open store");
        for extent in 1..=extent_count {
            store.create_extent(extent).expect("Failed to create extent");
            let mut txn = store.begin().expect("Failed to begin");
            for i in 0..entries_per_extent {
                store
                    .store(
                        extent,
                        &scenario_key(i),
                        &scenario_value(extent, i),
                        Some(&mut txn),
                    )
                    .expect("Failed to stage entry");
            }
            store.commit(txn).expect("Failed to commit");
        }
        store
    }
}
