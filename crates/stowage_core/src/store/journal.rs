//! [`PersistentStore`] over the `stowage_engine` journal engine.
//!
//! Each extent is an engine namespace named by the decimal extent id.
//! The engine's `"default"` namespace is never used for data.

use super::{PersistentStore, Transaction, Visitor};
use crate::config::{EngineKind, StoreOptions};
use crate::error::{PersistenceError, PersistenceResult};
use crate::metadata::StoreMetadata;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_engine::{
    Engine, EngineError, EngineOptions, EngineTransaction, NamespaceHandle, DEFAULT_NAMESPACE,
    LOCK_FILE,
};

/// Transaction token of a [`JournalStore`].
#[derive(Debug)]
pub struct JournalTransaction {
    store_id: String,
    inner: EngineTransaction,
}

impl JournalTransaction {
    /// Id of the issuing store.
    #[must_use]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Number of staged writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug)]
struct OpenState {
    engine: Arc<Engine>,
    handles: BTreeMap<u64, NamespaceHandle>,
}

/// A store backed by one journal engine directory.
#[derive(Debug)]
pub struct JournalStore {
    id: String,
    dir: PathBuf,
    options: StoreOptions,
    state: RwLock<Option<OpenState>>,
}

const KIND: EngineKind = EngineKind::Journal;

impl JournalStore {
    /// Creates an unopened store for directory `data_dir`.
    #[must_use]
    pub fn new(store_id: &str, data_dir: PathBuf, options: StoreOptions) -> Self {
        Self {
            id: store_id.to_string(),
            dir: data_dir,
            options,
            state: RwLock::new(None),
        }
    }

    fn closed(&self) -> PersistenceError {
        PersistenceError::StoreClosed {
            store_id: self.id.clone(),
        }
    }

    fn engine_error(&self, action: &str, extent_id: Option<u64>, source: EngineError) -> PersistenceError {
        let context = match extent_id {
            Some(extent_id) => format!("error {action} extent {extent_id} of store {}", self.id),
            None => format!("error {action} store {}", self.id),
        };
        PersistenceError::engine(context, source)
    }

    fn open_error(&self, source: EngineError) -> PersistenceError {
        let message = match &source {
            EngineError::Locked { .. } => "the directory is locked by another instance",
            EngineError::MissingDirectory { .. } => "the directory does not exist",
            EngineError::Corruption { .. } | EngineError::ChecksumMismatch { .. } => {
                "the journal is unreadable"
            }
            _ => "the engine failed to open",
        };
        PersistenceError::StorageOpen {
            store_id: self.id.clone(),
            path: self.dir.clone(),
            message: message.to_string(),
            source: Some(source),
        }
    }

    fn engine(&self) -> PersistenceResult<Arc<Engine>> {
        self.state
            .read()
            .as_ref()
            .map(|state| Arc::clone(&state.engine))
            .ok_or_else(|| self.closed())
    }

    /// Resolves an extent to its engine and handle, releasing the state lock.
    fn extent(&self, extent_id: u64) -> PersistenceResult<(Arc<Engine>, NamespaceHandle)> {
        let state = self.state.read();
        let state = state.as_ref().ok_or_else(|| self.closed())?;
        let handle = state
            .handles
            .get(&extent_id)
            .ok_or_else(|| PersistenceError::ExtentNotOpen {
                store_id: self.id.clone(),
                extent_id,
            })?;
        Ok((Arc::clone(&state.engine), handle.clone()))
    }

    fn token<'t>(
        &self,
        engine: &Engine,
        txn: &'t mut Transaction,
    ) -> PersistenceResult<&'t mut EngineTransaction> {
        match txn {
            Transaction::Journal(txn) if engine.owns(&txn.inner) => Ok(&mut txn.inner),
            _ => Err(PersistenceError::InvalidToken {
                store_id: self.id.clone(),
            }),
        }
    }

    fn into_token(&self, engine: &Engine, txn: Transaction) -> PersistenceResult<EngineTransaction> {
        match txn {
            Transaction::Journal(txn) if engine.owns(&txn.inner) => Ok(txn.inner),
            _ => Err(PersistenceError::InvalidToken {
                store_id: self.id.clone(),
            }),
        }
    }

    fn bind_all(&self, engine: &Engine) -> PersistenceResult<BTreeMap<u64, NamespaceHandle>> {
        let mut handles = BTreeMap::new();
        for name in engine.list_namespaces() {
            match parse_extent_name(&name) {
                Some(extent_id) => {
                    let handle = engine
                        .namespace(&name)
                        .map_err(|e| self.engine_error("binding", Some(extent_id), e))?;
                    handles.insert(extent_id, handle);
                }
                None if name == DEFAULT_NAMESPACE => {}
                None => tracing::warn!(
                    store = %self.id,
                    namespace = %name,
                    "ignoring namespace that does not name an extent"
                ),
            }
        }
        Ok(handles)
    }

    /// Copies the directory of a same-format store file by file.
    fn copy_files_from(&self, source_dir: &Path) -> PersistenceResult<()> {
        let meta = StoreMetadata::read(source_dir)?;
        if !meta.is_complete() {
            return Err(PersistenceError::invalid_metadata(
                source_dir,
                "source store metadata appears to be incomplete",
            ));
        }
        if !meta.is_compatible(KIND.impl_version(), KIND.storage_format(), KIND.storage_version()) {
            return Err(PersistenceError::invalid_metadata(
                source_dir,
                "source store is incompatible with this engine",
            ));
        }

        copy_tree(source_dir, &self.dir).map_err(|e| {
            PersistenceError::io(
                format!(
                    "error copying store {} from {}",
                    self.id,
                    source_dir.display()
                ),
                e,
            )
        })
    }

    /// Copies every extent and entry of `source` through the store contract,
    /// in one transaction.
    fn copy_entries_from(&self, source: &dyn PersistentStore) -> PersistenceResult<()> {
        let mut extents = BTreeSet::new();
        source.load_extent_ids(&mut extents)?;
        for extent_id in &extents {
            self.create_extent(*extent_id)?;
        }

        let mut txn = self.begin()?;
        source.iterate(&mut |extent_id: u64, key: &[u8], value: &[u8]| -> PersistenceResult<bool> {
            self.store(extent_id, key, value, Some(&mut txn))?;
            Ok(true)
        })?;
        self.commit(txn)
    }
}

/// Full-store scan that stages every pair of `old_id` under `new_id`.
struct Rehome<'a> {
    store: &'a JournalStore,
    old_id: u64,
    new_id: u64,
    txn: Transaction,
    moved: usize,
}

impl Visitor for Rehome<'_> {
    fn visit_extent(&mut self, extent_id: u64) -> bool {
        extent_id == self.old_id
    }

    fn visit(&mut self, extent_id: u64, key: &[u8], value: &[u8]) -> PersistenceResult<bool> {
        if extent_id == self.old_id {
            self.store.store(self.new_id, key, value, Some(&mut self.txn))?;
            self.moved += 1;
        }
        Ok(true)
    }
}

/// Extent id named by an engine namespace, if it is a canonical decimal.
fn parse_extent_name(name: &str) -> Option<u64> {
    name.parse::<u64>()
        .ok()
        .filter(|id| id.to_string() == name)
}

/// Recursively copies `from` into `to`, skipping the engine lock file and
/// files already present at the destination.
fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == LOCK_FILE {
            continue;
        }
        let source = entry.path();
        let dest = to.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&source, &dest)?;
            continue;
        }
        let mut out = match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };
        io::copy(&mut fs::File::open(&source)?, &mut out)?;
        out.sync_all()?;
    }
    Ok(())
}

impl PersistentStore for JournalStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn storage_format(&self) -> &'static str {
        KIND.storage_format()
    }

    fn storage_version(&self) -> u32 {
        KIND.storage_version()
    }

    fn impl_version(&self) -> u32 {
        KIND.impl_version()
    }

    fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    fn open(&self) -> PersistenceResult<()> {
        let mut state = self.state.write();
        if state.is_some() {
            return Ok(());
        }

        if !self.options.read_only {
            fs::create_dir_all(&self.dir).map_err(|e| {
                PersistenceError::io(format!("error creating {}", self.dir.display()), e)
            })?;
        }
        let options = EngineOptions {
            create_if_missing: !self.options.read_only,
            read_only: self.options.read_only,
            sync_on_commit: self.options.sync_on_commit,
            auto_checkpoint_bytes: self.options.auto_checkpoint_bytes,
        };
        let engine = Engine::open(&self.dir, options).map_err(|e| self.open_error(e))?;
        let handles = self.bind_all(&engine)?;

        tracing::debug!(
            store = %self.id,
            path = %self.dir.display(),
            extents = handles.len(),
            read_only = self.options.read_only,
            "store opened"
        );
        *state = Some(OpenState {
            engine: Arc::new(engine),
            handles,
        });
        Ok(())
    }

    fn release(&self) -> Vec<PersistenceError> {
        let Some(OpenState { engine, handles }) = self.state.write().take() else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for (extent_id, handle) in handles {
            if let Err(e) = engine.close_namespace(handle) {
                let error = self.engine_error("closing", Some(extent_id), e);
                tracing::warn!(store = %self.id, error = %error, "failed to close extent");
                errors.push(error);
            }
        }

        match Arc::try_unwrap(engine) {
            Ok(engine) => {
                if let Err(e) = engine.close() {
                    let error = self.engine_error("closing", None, e);
                    tracing::warn!(store = %self.id, error = %error, "failed to close engine");
                    errors.push(error);
                }
            }
            Err(_) => tracing::warn!(
                store = %self.id,
                "engine still in use; it closes when the last reader finishes"
            ),
        }
        tracing::debug!(store = %self.id, "store released");
        errors
    }

    fn delete(&self) -> PersistenceResult<bool> {
        self.release();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(store = %self.id, path = %self.dir.display(), "store deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(
                format!("error deleting store {} at {}", self.id, self.dir.display()),
                e,
            )),
        }
    }

    fn load_extent_ids(&self, out: &mut BTreeSet<u64>) -> PersistenceResult<()> {
        let mut state = self.state.write();
        let state = state.as_mut().ok_or_else(|| self.closed())?;
        state.handles = self.bind_all(&state.engine)?;
        out.extend(state.handles.keys().copied());
        Ok(())
    }

    fn create_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let mut state = self.state.write();
        let state = state.as_mut().ok_or_else(|| self.closed())?;
        let name = extent_id.to_string();
        let handle = match state.engine.create_namespace(&name) {
            Ok(handle) => handle,
            Err(e) if e.is_already_exists() => state
                .engine
                .namespace(&name)
                .map_err(|e| self.engine_error("binding", Some(extent_id), e))?,
            Err(e) => return Err(self.engine_error("creating", Some(extent_id), e)),
        };
        state.handles.insert(extent_id, handle);
        Ok(())
    }

    fn delete_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let mut state = self.state.write();
        let state = state.as_mut().ok_or_else(|| self.closed())?;
        state.handles.remove(&extent_id);
        match state.engine.drop_namespace(&extent_id.to_string()) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.engine_error("deleting", Some(extent_id), e)),
        }
    }

    fn move_extent(&self, old_id: u64, new_id: u64) -> PersistenceResult<()> {
        self.extent(old_id)?;
        if old_id == new_id {
            return Ok(());
        }
        self.create_extent(new_id)?;

        let mut rehome = Rehome {
            store: self,
            old_id,
            new_id,
            txn: self.begin()?,
            moved: 0,
        };
        self.iterate(&mut rehome)?;
        let Rehome { txn, moved, .. } = rehome;
        self.commit(txn)?;
        self.delete_extent(old_id)?;

        tracing::debug!(store = %self.id, old_id, new_id, entries = moved, "extent moved");
        Ok(())
    }

    fn truncate_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let (engine, handle) = self.extent(extent_id)?;
        engine
            .clear_namespace(&handle)
            .map_err(|e| self.engine_error("truncating", Some(extent_id), e))
    }

    fn load(&self, extent_id: u64, key: &[u8]) -> PersistenceResult<Option<Bytes>> {
        let (engine, handle) = self.extent(extent_id)?;
        engine
            .get(&handle, key)
            .map_err(|e| self.engine_error("loading from", Some(extent_id), e))
    }

    fn store(
        &self,
        extent_id: u64,
        key: &[u8],
        value: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        let (engine, handle) = self.extent(extent_id)?;
        match txn {
            Some(txn) => {
                self.token(&engine, txn)?.put(&handle, key, value);
                Ok(())
            }
            None => engine
                .put(&handle, key, value)
                .map_err(|e| self.engine_error("storing into", Some(extent_id), e)),
        }
    }

    fn erase(
        &self,
        extent_id: u64,
        key: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        let (engine, handle) = self.extent(extent_id)?;
        match txn {
            Some(txn) => {
                self.token(&engine, txn)?.delete(&handle, key);
                Ok(())
            }
            None => engine
                .delete(&handle, key)
                .map_err(|e| self.engine_error("erasing from", Some(extent_id), e)),
        }
    }

    fn iterate(&self, visitor: &mut dyn Visitor) -> PersistenceResult<()> {
        let (engine, handles) = {
            let state = self.state.read();
            let state = state.as_ref().ok_or_else(|| self.closed())?;
            (Arc::clone(&state.engine), state.handles.clone())
        };

        for (extent_id, handle) in handles {
            if !visitor.visit_extent(extent_id) {
                continue;
            }
            let entries = match engine.scan(&handle) {
                Ok(entries) => entries,
                // dropped since the handles were copied
                Err(EngineError::StaleHandle { .. }) => continue,
                Err(e) => return Err(self.engine_error("iterating", Some(extent_id), e)),
            };
            for (key, value) in &entries {
                match visitor.visit(extent_id, key, value) {
                    Ok(true) => {}
                    Ok(false) => return Ok(()),
                    Err(e) => {
                        return Err(PersistenceError::Visitor {
                            store_id: self.id.clone(),
                            source: Box::new(e),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn begin(&self) -> PersistenceResult<Transaction> {
        let inner = self
            .engine()?
            .begin()
            .map_err(|e| self.engine_error("beginning a transaction on", None, e))?;
        Ok(Transaction::Journal(JournalTransaction {
            store_id: self.id.clone(),
            inner,
        }))
    }

    fn commit(&self, txn: Transaction) -> PersistenceResult<()> {
        let engine = self.engine()?;
        let txn = self.into_token(&engine, txn)?;
        engine
            .commit(txn)
            .map_err(|e| self.engine_error("committing a transaction on", None, e))
    }

    fn abort(&self, txn: Transaction) -> PersistenceResult<()> {
        let engine = self.engine()?;
        let txn = self.into_token(&engine, txn)?;
        engine
            .rollback(txn)
            .map_err(|e| self.engine_error("aborting a transaction on", None, e))
    }

    fn checkpoint(&self) -> PersistenceResult<()> {
        let engine = self.engine()?;
        if engine.is_read_only() {
            return Ok(());
        }
        engine
            .checkpoint()
            .map(|_| ())
            .map_err(|e| self.engine_error("checkpointing", None, e))
    }

    fn backup_to(&self, dir: &Path) -> PersistenceResult<()> {
        self.engine()?
            .backup_to(dir)
            .map(|_| ())
            .map_err(|e| self.engine_error("backing up", None, e))
    }

    fn copy_and_open_from(&self, source: &dyn PersistentStore) -> PersistenceResult<()> {
        if self.is_open() {
            return Err(PersistenceError::StoreOpen {
                store_id: self.id.clone(),
            });
        }

        let result = if source.storage_format() == self.storage_format() {
            self.copy_files_from(source.data_dir())
                .and_then(|()| self.open())
        } else {
            self.open().and_then(|()| self.copy_entries_from(source))
        };

        if let Err(error) = result {
            tracing::warn!(
                store = %self.id,
                source = %source.id(),
                error = %error,
                "copy into new store failed; removing it"
            );
            if let Err(e) = self.delete() {
                tracing::warn!(store = %self.id, error = %e, "failed to remove partial store");
            }
            return Err(error);
        }
        tracing::info!(store = %self.id, source = %source.id(), "store copied and opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path, id: &str) -> JournalStore {
        let store = JournalStore::new(id, dir.join(id), StoreOptions::default());
        store.open().unwrap();
        store
    }

    fn contents(store: &dyn PersistentStore) -> Vec<(u64, Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        store
            .iterate(&mut |extent_id: u64, key: &[u8], value: &[u8]| -> PersistenceResult<bool> {
                out.push((extent_id, key.to_vec(), value.to_vec()));
                Ok(true)
            })
            .unwrap();
        out
    }

    #[test]
    fn store_and_load() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(7).unwrap();
        store.store(7, b"k", b"v", None).unwrap();
        assert_eq!(store.load(7, b"k").unwrap().as_deref(), Some(&b"v"[..]));
        assert_eq!(store.load(7, b"missing").unwrap(), None);

        store.erase(7, b"k", None).unwrap();
        store.erase(7, b"k", None).unwrap();
        assert_eq!(store.load(7, b"k").unwrap(), None);
    }

    #[test]
    fn unknown_extent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        assert!(matches!(
            store.load(3, b"k"),
            Err(PersistenceError::ExtentNotOpen { extent_id: 3, .. })
        ));
        assert!(matches!(
            store.store(3, b"k", b"v", None),
            Err(PersistenceError::ExtentNotOpen { .. })
        ));
        store.delete_extent(3).unwrap();
    }

    #[test]
    fn create_extent_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        store.store(1, b"k", b"v", None).unwrap();
        store.create_extent(1).unwrap();
        assert_eq!(store.load(1, b"k").unwrap().as_deref(), Some(&b"v"[..]));

        let mut ids = BTreeSet::new();
        store.load_extent_ids(&mut ids).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn extents_survive_reopen() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(2).unwrap();
        store.create_extent(10).unwrap();
        store.store(10, b"a", b"1", None).unwrap();
        assert!(store.release().is_empty());
        assert!(!store.is_open());
        assert!(store.release().is_empty());

        store.open().unwrap();
        let mut ids = BTreeSet::new();
        store.load_extent_ids(&mut ids).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![2, 10]);
        assert_eq!(store.load(10, b"a").unwrap().as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn transaction_commit_and_abort() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        store.create_extent(2).unwrap();

        let mut txn = store.begin().unwrap();
        store.store(1, b"a", b"1", Some(&mut txn)).unwrap();
        store.store(2, b"b", b"2", Some(&mut txn)).unwrap();
        assert_eq!(txn.len(), 2);
        assert_eq!(store.load(1, b"a").unwrap(), None);
        store.abort(txn).unwrap();
        assert_eq!(store.load(1, b"a").unwrap(), None);

        let mut txn = store.begin().unwrap();
        store.store(1, b"a", b"1", Some(&mut txn)).unwrap();
        store.store(2, b"b", b"2", Some(&mut txn)).unwrap();
        store.commit(txn).unwrap();
        assert_eq!(store.load(1, b"a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(store.load(2, b"b").unwrap().as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn foreign_token_is_rejected() {
        let dir = tempdir().unwrap();
        let a = store_in(dir.path(), "a");
        let b = store_in(dir.path(), "b");
        a.create_extent(1).unwrap();
        b.create_extent(1).unwrap();

        let mut txn = a.begin().unwrap();
        assert_eq!(txn.store_id(), "a");
        assert!(matches!(
            b.store(1, b"k", b"v", Some(&mut txn)),
            Err(PersistenceError::InvalidToken { .. })
        ));
        assert!(matches!(b.commit(txn), Err(PersistenceError::InvalidToken { .. })));

        let txn = a.begin().unwrap();
        assert!(matches!(b.abort(txn), Err(PersistenceError::InvalidToken { .. })));
    }

    #[test]
    fn token_from_before_reopen_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        let txn = store.begin().unwrap();
        store.release();
        store.open().unwrap();
        assert!(matches!(store.commit(txn), Err(PersistenceError::InvalidToken { .. })));
    }

    #[test]
    fn iterate_order_and_short_circuit() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        for extent_id in [9, 3] {
            store.create_extent(extent_id).unwrap();
            store.store(extent_id, b"b", b"2", None).unwrap();
            store.store(extent_id, b"a", b"1", None).unwrap();
        }
        let seen: Vec<_> = contents(&store).into_iter().map(|(e, k, _)| (e, k)).collect();
        assert_eq!(
            seen,
            vec![
                (3, b"a".to_vec()),
                (3, b"b".to_vec()),
                (9, b"a".to_vec()),
                (9, b"b".to_vec())
            ]
        );

        let mut visits = 0;
        store
            .iterate(&mut |_: u64, _: &[u8], _: &[u8]| -> PersistenceResult<bool> {
                visits += 1;
                Ok(visits < 3)
            })
            .unwrap();
        assert_eq!(visits, 3);
    }

    #[test]
    fn visitor_can_skip_extents() {
        struct OnlyNine(Vec<u64>);
        impl Visitor for OnlyNine {
            fn visit_extent(&mut self, extent_id: u64) -> bool {
                extent_id == 9
            }
            fn visit(&mut self, extent_id: u64, _: &[u8], _: &[u8]) -> PersistenceResult<bool> {
                self.0.push(extent_id);
                Ok(true)
            }
        }

        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        for extent_id in [1, 9] {
            store.create_extent(extent_id).unwrap();
            store.store(extent_id, b"k", b"v", None).unwrap();
        }
        let mut visitor = OnlyNine(Vec::new());
        store.iterate(&mut visitor).unwrap();
        assert_eq!(visitor.0, vec![9]);
    }

    #[test]
    fn visitor_error_propagates() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        store.store(1, b"k", b"v", None).unwrap();
        let result = store.iterate(&mut |_: u64, _: &[u8], _: &[u8]| -> PersistenceResult<bool> {
            Err(PersistenceError::invalid_argument("boom"))
        });
        assert!(matches!(result, Err(PersistenceError::Visitor { .. })));
    }

    #[test]
    fn move_and_truncate_extent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        store.create_extent(5).unwrap();
        store.store(1, b"a", b"1", None).unwrap();
        store.store(1, b"b", b"2", None).unwrap();
        store.store(5, b"z", b"9", None).unwrap();

        store.move_extent(1, 2).unwrap();
        assert!(matches!(store.load(1, b"a"), Err(PersistenceError::ExtentNotOpen { .. })));
        assert_eq!(store.load(2, b"a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(store.load(2, b"b").unwrap().as_deref(), Some(&b"2"[..]));
        assert_eq!(store.load(5, b"z").unwrap().as_deref(), Some(&b"9"[..]));

        store.truncate_extent(2).unwrap();
        assert_eq!(store.load(2, b"a").unwrap(), None);
        let mut ids = BTreeSet::new();
        store.load_extent_ids(&mut ids).unwrap();
        assert!(ids.contains(&2));
        assert!(matches!(store.move_extent(1, 3), Err(PersistenceError::ExtentNotOpen { .. })));
    }

    #[test]
    fn move_into_populated_extent_merges() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        for extent_id in [1, 2, 3] {
            store.create_extent(extent_id).unwrap();
        }
        store.store(1, b"shared", b"from-1", None).unwrap();
        store.store(1, b"only-1", b"a", None).unwrap();
        store.store(2, b"shared", b"from-2", None).unwrap();
        store.store(2, b"only-2", b"b", None).unwrap();
        store.store(3, b"other", b"c", None).unwrap();

        store.move_extent(1, 2).unwrap();
        assert_eq!(store.load(2, b"shared").unwrap().as_deref(), Some(&b"from-1"[..]));
        assert_eq!(store.load(2, b"only-1").unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(store.load(2, b"only-2").unwrap().as_deref(), Some(&b"b"[..]));
        assert_eq!(store.load(3, b"other").unwrap().as_deref(), Some(&b"c"[..]));

        store.move_extent(3, 3).unwrap();
        assert_eq!(store.load(3, b"other").unwrap().as_deref(), Some(&b"c"[..]));
        let mut ids = BTreeSet::new();
        store.load_extent_ids(&mut ids).unwrap();
        assert_eq!(ids, BTreeSet::from([2, 3]));
    }

    #[test]
    fn second_instance_cannot_open() {
        let dir = tempdir().unwrap();
        let first = store_in(dir.path(), "s");
        let second = JournalStore::new("s", dir.path().join("s"), StoreOptions::default());
        let err = second.open().unwrap_err();
        assert!(err.is_storage_open());
        assert!(!second.is_open());

        first.release();
        second.open().unwrap();
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = JournalStore::new("s", dir.path().join("s"), StoreOptions::default());
        assert!(matches!(store.create_extent(1), Err(PersistenceError::StoreClosed { .. })));
        assert!(matches!(store.begin(), Err(PersistenceError::StoreClosed { .. })));
        assert!(!store.delete().unwrap());
    }

    #[test]
    fn delete_removes_directory() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        assert!(store.delete().unwrap());
        assert!(!dir.path().join("s").exists());
        assert!(!store.delete().unwrap());
    }

    #[test]
    fn copy_same_format() {
        let dir = tempdir().unwrap();
        let source = store_in(dir.path(), "src");
        source.create_extent(4).unwrap();
        source.store(4, b"k", b"v", None).unwrap();
        StoreMetadata::new(0, "journal", 1).write(source.data_dir()).unwrap();
        source.release();

        let dest = JournalStore::new("dst", dir.path().join("dst"), StoreOptions::default());
        dest.copy_and_open_from(&source).unwrap();
        assert!(dest.is_open());
        assert_eq!(dest.load(4, b"k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(dest.data_dir().join("meta.properties").exists());
    }

    #[test]
    fn copy_without_metadata_fails_and_cleans_up() {
        let dir = tempdir().unwrap();
        let source = store_in(dir.path(), "src");
        source.release();

        let dest = JournalStore::new("dst", dir.path().join("dst"), StoreOptions::default());
        assert!(dest.copy_and_open_from(&source).is_err());
        assert!(!dest.is_open());
        assert!(!dir.path().join("dst").exists());
    }

    #[test]
    fn copy_entries_through_contract() {
        let dir = tempdir().unwrap();
        let source = store_in(dir.path(), "src");
        source.create_extent(1).unwrap();
        source.create_extent(8).unwrap();
        source.store(1, b"a", b"1", None).unwrap();

        let dest = store_in(dir.path(), "dst");
        dest.copy_entries_from(&source).unwrap();
        assert_eq!(contents(&dest), contents(&source));
        let mut ids = BTreeSet::new();
        dest.load_extent_ids(&mut ids).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 8]);
    }

    #[test]
    fn read_only_store() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s");
        store.create_extent(1).unwrap();
        store.store(1, b"k", b"v", None).unwrap();
        store.release();

        let options = StoreOptions {
            read_only: true,
            ..StoreOptions::default()
        };
        let reader = JournalStore::new("s", dir.path().join("s"), options);
        reader.open().unwrap();
        assert!(reader.is_read_only());
        assert_eq!(reader.load(1, b"k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(reader.store(1, b"k", b"w", None).is_err());
        assert!(reader.begin().is_err());
        reader.checkpoint().unwrap();
    }

    #[test]
    fn extent_names() {
        assert_eq!(parse_extent_name("42"), Some(42));
        assert_eq!(parse_extent_name("042"), None);
        assert_eq!(parse_extent_name("default"), None);
        assert_eq!(parse_extent_name("-1"), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Store(u64, u8, Vec<u8>),
        Erase(u64, u8),
        Move(u64, u64),
        Reopen,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1u64..5, 0u8..8, proptest::collection::vec(any::<u8>(), 0..16))
                .prop_map(|(extent, key, value)| Op::Store(extent, key, value)),
            2 => (1u64..5, 0u8..8).prop_map(|(extent, key)| Op::Erase(extent, key)),
            1 => (1u64..5, 1u64..5).prop_map(|(from, to)| Op::Move(from, to)),
            1 => Just(Op::Reopen),
        ]
    }

    proptest! {
        #[test]
        fn survives_reopen_like_model(ops in proptest::collection::vec(op(), 1..40)) {
            let dir = tempdir().unwrap();
            let store = store_in(dir.path(), "s");
            let mut model: BTreeMap<u64, BTreeMap<Vec<u8>, Vec<u8>>> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Store(extent, key, value) => {
                        store.create_extent(extent).unwrap();
                        store.store(extent, &[key], &value, None).unwrap();
                        model.entry(extent).or_default().insert(vec![key], value);
                    }
                    Op::Erase(extent, key) => {
                        if let Some(entries) = model.get_mut(&extent) {
                            store.erase(extent, &[key], None).unwrap();
                            entries.remove(&vec![key]);
                        }
                    }
                    Op::Move(from, to) => {
                        if let Some(entries) = model.remove(&from) {
                            store.move_extent(from, to).unwrap();
                            if from == to {
                                model.insert(from, entries);
                            } else {
                                model.entry(to).or_default().extend(entries);
                            }
                        }
                    }
                    Op::Reopen => {
                        store.release();
                        store.open().unwrap();
                    }
                }
            }

            let mut actual = contents(&store);
            actual.sort();
            let expected: Vec<_> = model
                .iter()
                .flat_map(|(extent, entries)| {
                    entries.iter().map(move |(k, v)| (*extent, k.clone(), v.clone()))
                })
                .collect();
            prop_assert_eq!(actual, expected);

            let mut ids = BTreeSet::new();
            store.load_extent_ids(&mut ids).unwrap();
            prop_assert_eq!(ids, model.keys().copied().collect::<BTreeSet<_>>());
        }
    }
}
