//! The persistence environment: active data plus named snapshots.

use crate::config::EnvironmentConfig;
use crate::error::{PersistenceError, PersistenceResult};
use crate::manager::{move_to_trash, store_dirs, PersistenceManager};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the managers of one deployment.
///
/// The active manager holds live data. Snapshots are written under the
/// snapshot root, one directory per name, and are opened through
/// read-only managers.
///
/// ```text
/// <base>/active/<store-id>/...
/// <base>/snapshots/<name>/<store-id>/...
/// <base>/trash/...
/// ```
#[derive(Debug)]
pub struct PersistenceEnvironment {
    config: EnvironmentConfig,
    active: Mutex<Option<Arc<PersistenceManager>>>,
    events: Mutex<Option<Arc<PersistenceManager>>>,
    released: AtomicBool,
}

impl PersistenceEnvironment {
    /// Creates an environment.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Configuration`] if the configured
    /// directories are not pairwise distinct.
    pub fn new(config: EnvironmentConfig) -> PersistenceResult<Self> {
        config.validate()?;
        tracing::debug!(
            active = %config.active_dir.display(),
            snapshots = %config.snapshot_dir.display(),
            "persistence environment created"
        );
        Ok(Self {
            config,
            active: Mutex::new(None),
            events: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// The environment configuration.
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    fn ensure_active(&self) -> PersistenceResult<()> {
        if self.released.load(Ordering::Acquire) {
            Err(PersistenceError::Released {
                what: "environment",
            })
        } else {
            Ok(())
        }
    }

    /// The manager over the active directory, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the active directory cannot be created.
    pub fn open_active(&self) -> PersistenceResult<Arc<PersistenceManager>> {
        self.ensure_active()?;
        let mut active = self.active.lock();
        if let Some(manager) = active.as_ref() {
            return Ok(Arc::clone(manager));
        }
        let config = self.config.manager_config(self.config.active_dir.clone());
        let manager = Arc::new(PersistenceManager::new(config)?);
        *active = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// The manager over the events directory, if one is configured.
    ///
    /// This manager is the only owner of the events directory; the active
    /// manager is created without one.
    ///
    /// # Errors
    ///
    /// Returns an error if the events directory cannot be created.
    pub fn open_events(&self) -> PersistenceResult<Option<Arc<PersistenceManager>>> {
        self.ensure_active()?;
        let Some(events_dir) = &self.config.events_dir else {
            return Ok(None);
        };
        let mut events = self.events.lock();
        if let Some(manager) = events.as_ref() {
            return Ok(Some(Arc::clone(manager)));
        }
        let manager = Arc::new(PersistenceManager::new(
            self.config.manager_config(events_dir.clone()),
        )?);
        *events = Some(Arc::clone(&manager));
        Ok(Some(manager))
    }

    fn snapshot_path(&self, name: &str) -> PersistenceResult<PathBuf> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PersistenceError::invalid_argument("snapshot name is empty"));
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(PersistenceError::invalid_argument(format!(
                "snapshot name {name:?} is not a plain name"
            )));
        }
        Ok(self.config.snapshot_dir.join(name))
    }

    /// Snapshots the active manager's open stores as `name` and returns a
    /// read-only manager over the result.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::AlreadyExists`] if the snapshot exists,
    /// or [`PersistenceError::Snapshot`] if copying a store fails.
    pub fn create_snapshot(&self, name: &str) -> PersistenceResult<PersistenceManager> {
        let source = self.open_active()?;
        self.create_snapshot_from(name, &source)
    }

    /// Snapshots the open stores of `source` as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidArgument`] if `source` uses a
    /// different engine than this environment, otherwise as for
    /// [`PersistenceEnvironment::create_snapshot`].
    pub fn create_snapshot_from(
        &self,
        name: &str,
        source: &PersistenceManager,
    ) -> PersistenceResult<PersistenceManager> {
        self.ensure_active()?;
        let expected = self.config.engine.storage_format();
        let actual = source.config().engine.storage_format();
        if expected != actual {
            return Err(PersistenceError::invalid_argument(format!(
                "source manager writes {actual:?} stores, this environment uses {expected:?}"
            )));
        }

        let target = self.snapshot_path(name)?;
        if target.exists() {
            return Err(PersistenceError::AlreadyExists { path: target });
        }
        fs::create_dir_all(&self.config.snapshot_dir).map_err(|e| {
            PersistenceError::io(
                format!("error creating {}", self.config.snapshot_dir.display()),
                e,
            )
        })?;

        source.create_snapshot(&target)?;
        tracing::info!(snapshot = %name.trim(), path = %target.display(), "environment snapshot created");
        self.snapshot_manager(name, target)
    }

    fn snapshot_manager(&self, name: &str, dir: PathBuf) -> PersistenceResult<PersistenceManager> {
        let config = self
            .config
            .manager_config(dir)
            .name(name.trim())
            .read_only(true);
        PersistenceManager::new(config)
    }

    /// A read-only manager over snapshot `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidArgument`] if no such snapshot
    /// exists.
    pub fn open_snapshot(&self, name: &str) -> PersistenceResult<PersistenceManager> {
        self.ensure_active()?;
        let dir = self.snapshot_path(name)?;
        if !dir.is_dir() {
            return Err(PersistenceError::invalid_argument(format!(
                "no snapshot named {:?}",
                name.trim()
            )));
        }
        self.snapshot_manager(name, dir)
    }

    /// Names of the existing snapshots, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot root cannot be read.
    pub fn list_snapshots(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_active()?;
        Ok(store_dirs(&self.config.snapshot_dir)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Removes snapshot `name`, moving it to the trash when one is
    /// configured. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be moved or removed.
    pub fn remove_snapshot(&self, name: &str) -> PersistenceResult<bool> {
        self.ensure_active()?;
        let dir = self.snapshot_path(name)?;
        if !dir.is_dir() {
            return Ok(false);
        }

        let result = match &self.config.trash_dir {
            Some(trash) => move_to_trash(&dir, trash, name.trim()).map(|dest| {
                tracing::info!(snapshot = %name.trim(), trash = %dest.display(), "snapshot moved to trash");
            }),
            None => fs::remove_dir_all(&dir).map(|()| {
                tracing::info!(snapshot = %name.trim(), "snapshot removed");
            }),
        };
        result
            .map(|()| true)
            .map_err(|e| PersistenceError::io(format!("error removing snapshot {}", name.trim()), e))
    }

    /// Releases the active and events managers. Further use fails with
    /// [`PersistenceError::Released`].
    ///
    /// Returns the failures encountered, already logged. Idempotent.
    pub fn release(&self) -> Vec<PersistenceError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let managers = [self.active.lock().take(), self.events.lock().take()];
        managers
            .iter()
            .flatten()
            .flat_map(|manager| manager.release())
            .collect()
    }
}
