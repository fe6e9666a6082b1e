//! Offline inspection and validation of a store directory.

use crate::config::{EngineKind, Heartbeat, StoreOptions};
use crate::error::{PersistenceError, PersistenceResult};
use crate::manager::store_dirs;
use crate::metadata::StoreMetadata;
use crate::seal;
use crate::store::{PersistentStore, Visitor};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Summary of the stores in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineInfo {
    /// Store ids with metadata, in sorted order.
    pub guids: Vec<String>,
    /// Storage format of the stores.
    pub storage_format: String,
    /// Storage version of the stores.
    pub storage_version: u32,
    /// Implementation version of the stores.
    pub impl_version: u32,
}

/// Figures for one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Store id.
    pub guid: String,
    /// Number of extents, including the control extent.
    pub extents: usize,
    /// Number of entries across all extents.
    pub entries: u64,
    /// Sum of key and value lengths.
    pub bytes: u64,
    /// Whether the store is sealed.
    pub sealed: bool,
    /// Recorded partition count, if sealed.
    pub partition_count: Option<u32>,
}

/// Offline tools over a snapshot or data directory.
///
/// Stores are opened read-only, one at a time, and released before the
/// next is touched. The directory must not be in use by a writable
/// manager.
#[derive(Debug, Clone)]
pub struct PersistenceTools {
    dir: PathBuf,
    engine: EngineKind,
    heartbeat: Option<Heartbeat>,
}

impl PersistenceTools {
    /// Tools over `dir` for stores written by `engine`.
    #[must_use]
    pub fn new(dir: PathBuf, engine: EngineKind, heartbeat: Option<Heartbeat>) -> Self {
        Self {
            dir,
            engine,
            heartbeat,
        }
    }

    /// Tools over a snapshot directory, discovering the engine from the
    /// first store's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidMetadata`] if the directory has
    /// no store with metadata or names an unknown storage format.
    pub fn snapshot_tools(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        for (_, store_dir) in store_dirs(&dir)? {
            let Some(meta) = StoreMetadata::read_if_present(&store_dir)? else {
                continue;
            };
            let format = meta.storage_format().unwrap_or_default();
            let engine = EngineKind::from_storage_format(format).ok_or_else(|| {
                PersistenceError::invalid_metadata(
                    &store_dir,
                    format!("unknown storage format {format:?}"),
                )
            })?;
            return Ok(Self::new(dir, engine, None));
        }
        Err(PersistenceError::invalid_metadata(
            &dir,
            "no store with metadata found",
        ))
    }

    /// Sets the heartbeat callback.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// The inspected directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The engine the stores are read with.
    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    fn beat(&self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.beat();
        }
    }

    /// Ids of the stores that carry metadata.
    fn guids(&self) -> PersistenceResult<Vec<String>> {
        let mut guids = Vec::new();
        for (id, store_dir) in store_dirs(&self.dir)? {
            if StoreMetadata::read_if_present(&store_dir)?.is_some() {
                guids.push(id);
            }
        }
        Ok(guids)
    }

    fn open_read_only(&self, guid: &str) -> PersistenceResult<Box<dyn PersistentStore>> {
        let options = StoreOptions {
            read_only: true,
            ..StoreOptions::default()
        };
        let store = self.engine.instantiate(guid, self.dir.join(guid), options);
        store.open()?;
        Ok(store)
    }

    /// Runs `f` over a read-only store, releasing it afterwards.
    fn with_store<T>(
        &self,
        guid: &str,
        f: impl FnOnce(&dyn PersistentStore) -> PersistenceResult<T>,
    ) -> PersistenceResult<T> {
        let store = self.open_read_only(guid)?;
        let result = f(store.as_ref());
        for error in store.release() {
            tracing::warn!(store = %guid, error = %error, "release after inspection");
        }
        result
    }

    /// Store ids and versions of the directory.
    ///
    /// Versions come from the first store; with no stores they are the
    /// engine's own.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a metadata file cannot be read.
    pub fn info(&self) -> PersistenceResult<OfflineInfo> {
        let guids = self.guids()?;
        let mut info = OfflineInfo {
            guids: Vec::new(),
            storage_format: self.engine.storage_format().to_string(),
            storage_version: self.engine.storage_version(),
            impl_version: self.engine.impl_version(),
        };
        if let Some(first) = guids.first() {
            let meta = StoreMetadata::read(&self.dir.join(first))?;
            if let Some(format) = meta.storage_format() {
                info.storage_format = format.to_string();
            }
            info.storage_version = meta.storage_version().unwrap_or(info.storage_version);
            info.impl_version = meta.impl_version().unwrap_or(info.impl_version);
        }
        info.guids = guids;
        Ok(info)
    }

    /// Checks that the given stores agree on format, implementation
    /// version and storage version.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::MetadataInconsistent`] naming the first
    /// store that disagrees with the first one, or an I/O error if a
    /// metadata file is missing.
    pub fn validate_consistency(&self, guids: &[String]) -> PersistenceResult<()> {
        let Some((first, rest)) = guids.split_first() else {
            return Ok(());
        };
        let expected = self.versions(first)?;
        for guid in rest {
            if self.versions(guid)? != expected {
                return Err(PersistenceError::MetadataInconsistent {
                    path: self.dir.clone(),
                    guid: guid.clone(),
                });
            }
        }
        Ok(())
    }

    fn versions(&self, guid: &str) -> PersistenceResult<(Option<u32>, Option<u32>, String)> {
        let meta = StoreMetadata::read(&self.dir.join(guid))?;
        Ok((
            meta.impl_version(),
            meta.storage_version(),
            meta.storage_format().unwrap_or_default().to_string(),
        ))
    }

    /// Checks that every store is sealed, then that all stores are
    /// consistent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StoreNotSealed`] for the first unsealed
    /// store or [`PersistenceError::MetadataInconsistent`].
    pub fn validate(&self) -> PersistenceResult<()> {
        let guids = self.guids()?;
        for guid in &guids {
            self.beat();
            let sealed = self.with_store(guid, seal::is_sealed)?;
            if !sealed {
                return Err(PersistenceError::StoreNotSealed {
                    store_id: guid.clone(),
                });
            }
        }
        self.validate_consistency(&guids)
    }

    /// Per-store extent, entry and byte counts.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be opened or read.
    pub fn statistics(&self) -> PersistenceResult<Vec<StoreStatistics>> {
        let mut all = Vec::new();
        for guid in self.guids()? {
            self.beat();
            let stats = self.with_store(&guid, |store| {
                let mut extents = BTreeSet::new();
                store.load_extent_ids(&mut extents)?;
                let mut counter = Counter {
                    heartbeat: self.heartbeat.as_ref(),
                    entries: 0,
                    bytes: 0,
                };
                store.iterate(&mut counter)?;
                Ok(StoreStatistics {
                    guid: guid.clone(),
                    extents: extents.len(),
                    entries: counter.entries,
                    bytes: counter.bytes,
                    sealed: seal::is_sealed(store)?,
                    partition_count: seal::partition_count(store)?,
                })
            })?;
            all.push(stats);
        }
        Ok(all)
    }
}

struct Counter<'a> {
    heartbeat: Option<&'a Heartbeat>,
    entries: u64,
    bytes: u64,
}

impl Visitor for Counter<'_> {
    fn visit(&mut self, _: u64, key: &[u8], value: &[u8]) -> PersistenceResult<bool> {
        self.entries += 1;
        self.bytes += (key.len() + value.len()) as u64;
        if let Some(heartbeat) = self.heartbeat {
            if self.entries % crate::config::HEARTBEAT_INTERVAL == 0 {
                heartbeat.beat();
            }
        }
        Ok(true)
    }
}
