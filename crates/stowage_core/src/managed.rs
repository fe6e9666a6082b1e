//! Manager-owned stores: lifecycle state machine and metadata checks.

use crate::error::{PersistenceError, PersistenceResult};
use crate::metadata::StoreMetadata;
use crate::store::{PersistentStore, Transaction, Visitor};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

/// Lifecycle state of a [`ManagedStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Never opened.
    Unopened,
    /// An open is in progress.
    Opening,
    /// Open and usable.
    Open,
    /// A release is in progress.
    Releasing,
    /// Released; may be reopened.
    Released,
    /// A delete is in progress.
    Deleting,
    /// Deleted; reopening recreates it empty.
    Deleted,
}

impl StoreState {
    const fn is_transitional(self) -> bool {
        matches!(self, Self::Opening | Self::Releasing | Self::Deleting)
    }
}

/// A store owned by a [`crate::PersistenceManager`].
///
/// Wraps an engine store with a lifecycle state machine and a lock that
/// data operations take shared and exclusive tasks (snapshots, release,
/// delete) take exclusively. Callers racing to open the same store wait
/// for the single open in progress.
#[derive(Debug)]
pub struct ManagedStore {
    inner: Box<dyn PersistentStore>,
    state: Mutex<StoreState>,
    changed: Condvar,
    lock: RwLock<()>,
}

impl ManagedStore {
    pub(crate) fn new(inner: Box<dyn PersistentStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(StoreState::Unopened),
            changed: Condvar::new(),
            lock: RwLock::new(()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StoreState {
        *self.state.lock()
    }

    /// The wrapped engine store, bypassing the lock.
    pub(crate) fn inner(&self) -> &dyn PersistentStore {
        self.inner.as_ref()
    }

    /// Holds off every data operation until the guard drops.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    /// Waits out any transition, then moves to `next` if the current state
    /// satisfies `from`. Returns the state found.
    fn transition(&self, from: impl Fn(StoreState) -> bool, next: StoreState) -> (StoreState, bool) {
        let mut state = self.state.lock();
        while state.is_transitional() {
            self.changed.wait(&mut state);
        }
        let found = *state;
        if from(found) {
            *state = next;
            (found, true)
        } else {
            (found, false)
        }
    }

    fn settle(&self, state: StoreState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    /// Checks an existing store's metadata, opens the engine and records
    /// current metadata.
    fn open_checked(&self) -> PersistenceResult<()> {
        let dir = self.inner.data_dir();
        if has_contents(dir)? {
            self.check_metadata(dir)?;
        }

        self.inner.open()?;
        if !self.inner.is_read_only() {
            let meta = StoreMetadata::new(
                self.inner.impl_version(),
                self.inner.storage_format(),
                self.inner.storage_version(),
            );
            if let Err(e) = meta.write(dir) {
                for error in self.inner.release() {
                    tracing::warn!(store = %self.inner.id(), error = %error, "release after failed open");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn check_metadata(&self, dir: &Path) -> PersistenceResult<()> {
        let meta = StoreMetadata::read_if_present(dir)?.unwrap_or_default();
        if !meta.is_complete() {
            return Err(PersistenceError::invalid_metadata(
                dir,
                format!("store {} appears to be incomplete", self.inner.id()),
            ));
        }
        if !meta.is_compatible(
            self.inner.impl_version(),
            self.inner.storage_format(),
            self.inner.storage_version(),
        ) {
            return Err(PersistenceError::invalid_metadata(
                dir,
                format!("store {} is incompatible with this manager", self.inner.id()),
            ));
        }
        Ok(())
    }
}

/// Returns `true` if `dir` exists and holds at least one entry.
fn has_contents(dir: &Path) -> PersistenceResult<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PersistenceError::io(
            format!("error reading {}", dir.display()),
            e,
        )),
    }
}

impl PersistentStore for ManagedStore {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn data_dir(&self) -> &Path {
        self.inner.data_dir()
    }

    fn storage_format(&self) -> &'static str {
        self.inner.storage_format()
    }

    fn storage_version(&self) -> u32 {
        self.inner.storage_version()
    }

    fn impl_version(&self) -> u32 {
        self.inner.impl_version()
    }

    fn is_open(&self) -> bool {
        self.state() == StoreState::Open
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn open(&self) -> PersistenceResult<()> {
        let (found, moved) = self.transition(|s| s != StoreState::Open, StoreState::Opening);
        if !moved {
            return Ok(());
        }

        let result = self.open_checked();
        match &result {
            Ok(()) => {
                tracing::debug!(store = %self.id(), from = ?found, "managed store open");
                self.settle(StoreState::Open);
            }
            Err(_) => self.settle(found),
        }
        result
    }

    fn release(&self) -> Vec<PersistenceError> {
        let (_, moved) = self.transition(|s| s == StoreState::Open, StoreState::Releasing);
        if !moved {
            return Vec::new();
        }
        let errors = {
            let _exclusive = self.lock.write();
            self.inner.release()
        };
        self.settle(StoreState::Released);
        errors
    }

    fn delete(&self) -> PersistenceResult<bool> {
        let (found, moved) = self.transition(|s| s != StoreState::Deleted, StoreState::Deleting);
        if !moved {
            return Ok(false);
        }
        let result = {
            let _exclusive = self.lock.write();
            self.inner.delete()
        };
        match &result {
            Ok(_) => self.settle(StoreState::Deleted),
            Err(_) if found == StoreState::Open => self.settle(StoreState::Released),
            Err(_) => self.settle(found),
        }
        result
    }

    fn load_extent_ids(&self, out: &mut BTreeSet<u64>) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.load_extent_ids(out)
    }

    fn create_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.create_extent(extent_id)
    }

    fn delete_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.delete_extent(extent_id)
    }

    fn move_extent(&self, old_id: u64, new_id: u64) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.move_extent(old_id, new_id)
    }

    fn truncate_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.truncate_extent(extent_id)
    }

    fn load(&self, extent_id: u64, key: &[u8]) -> PersistenceResult<Option<Bytes>> {
        let _shared = self.lock.read_recursive();
        self.inner.load(extent_id, key)
    }

    fn store(
        &self,
        extent_id: u64,
        key: &[u8],
        value: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.store(extent_id, key, value, txn)
    }

    fn erase(
        &self,
        extent_id: u64,
        key: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.erase(extent_id, key, txn)
    }

    fn iterate(&self, visitor: &mut dyn Visitor) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.iterate(visitor)
    }

    fn begin(&self) -> PersistenceResult<Transaction> {
        let _shared = self.lock.read_recursive();
        self.inner.begin()
    }

    fn commit(&self, txn: Transaction) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.commit(txn)
    }

    fn abort(&self, txn: Transaction) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.abort(txn)
    }

    fn checkpoint(&self) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.checkpoint()
    }

    fn backup_to(&self, dir: &Path) -> PersistenceResult<()> {
        let _shared = self.lock.read_recursive();
        self.inner.backup_to(dir)
    }

    fn copy_and_open_from(&self, source: &dyn PersistentStore) -> PersistenceResult<()> {
        let (found, moved) = self.transition(
            |s| matches!(s, StoreState::Unopened | StoreState::Released | StoreState::Deleted),
            StoreState::Opening,
        );
        if !moved {
            return Err(PersistenceError::StoreOpen {
                store_id: self.id().to_string(),
            });
        }

        let result = self.inner.copy_and_open_from(source).and_then(|()| {
            if self.inner.is_read_only() {
                return Ok(());
            }
            StoreMetadata::new(
                self.inner.impl_version(),
                self.inner.storage_format(),
                self.inner.storage_version(),
            )
            .write(self.inner.data_dir())
        });
        match &result {
            Ok(()) => self.settle(StoreState::Open),
            Err(_) => self.settle(found),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::metadata::{META_FILENAME, META_STORAGE_VERSION};
    use crate::store::journal::JournalStore;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn managed(dir: &Path, id: &str) -> ManagedStore {
        ManagedStore::new(Box::new(JournalStore::new(
            id,
            dir.join(id),
            StoreOptions::default(),
        )))
    }

    #[test]
    fn lifecycle_states() {
        let dir = tempdir().unwrap();
        let store = managed(dir.path(), "s");
        assert_eq!(store.state(), StoreState::Unopened);

        store.open().unwrap();
        assert_eq!(store.state(), StoreState::Open);
        assert!(store.data_dir().join(META_FILENAME).exists());
        store.create_extent(1).unwrap();
        store.store(1, b"k", b"v", None).unwrap();

        assert!(store.release().is_empty());
        assert_eq!(store.state(), StoreState::Released);
        assert!(store.release().is_empty());

        store.open().unwrap();
        assert_eq!(store.load(1, b"k").unwrap().as_deref(), Some(&b"v"[..]));

        assert!(store.delete().unwrap());
        assert_eq!(store.state(), StoreState::Deleted);
        assert!(!store.delete().unwrap());

        store.open().unwrap();
        let mut ids = BTreeSet::new();
        store.load_extent_ids(&mut ids).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn existing_store_without_metadata_is_refused() {
        let dir = tempdir().unwrap();
        let store = managed(dir.path(), "s");
        store.open().unwrap();
        store.release();
        fs::remove_file(dir.path().join("s").join(META_FILENAME)).unwrap();

        let err = store.open().unwrap_err();
        assert!(err.to_string().contains("appears to be incomplete"));
        assert_eq!(store.state(), StoreState::Released);
    }

    #[test]
    fn incompatible_metadata_is_refused() {
        let dir = tempdir().unwrap();
        let store = managed(dir.path(), "s");
        store.open().unwrap();
        store.release();

        let store_dir = dir.path().join("s");
        let mut meta = StoreMetadata::read(&store_dir).unwrap();
        meta.set(META_STORAGE_VERSION, "99");
        meta.write(&store_dir).unwrap();

        let err = store.open().unwrap_err();
        assert!(err.to_string().contains("is incompatible with this manager"));
    }

    #[test]
    fn empty_existing_directory_is_new() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("s")).unwrap();
        let store = managed(dir.path(), "s");
        store.open().unwrap();
        assert!(store.is_open());
    }

    #[test]
    fn concurrent_opens_share_one_open() {
        let dir = tempdir().unwrap();
        let store = Arc::new(managed(dir.path(), "s"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.open())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(store.is_open());
    }

    #[test]
    fn exclusive_blocks_commit() {
        let dir = tempdir().unwrap();
        let store = Arc::new(managed(dir.path(), "s"));
        store.open().unwrap();
        store.create_extent(1).unwrap();
        let mut txn = store.begin().unwrap();
        store.store(1, b"k", b"v", Some(&mut txn)).unwrap();

        let guard = store.exclusive();
        let committer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit(txn))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(store.inner().load(1, b"k").unwrap(), None);
        drop(guard);

        committer.join().unwrap().unwrap();
        assert_eq!(store.load(1, b"k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn nested_read_proceeds_past_queued_exclusive() {
        let dir = tempdir().unwrap();
        let store = Arc::new(managed(dir.path(), "s"));
        store.open().unwrap();
        store.create_extent(1).unwrap();
        store.store(1, b"k", b"v", None).unwrap();

        let (done, finished) = std::sync::mpsc::channel();
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let nested = Arc::clone(&store);
                let mut visitor = |extent: u64, key: &[u8], _: &[u8]| -> PersistenceResult<bool> {
                    thread::sleep(std::time::Duration::from_millis(200));
                    nested.load(extent, key)?;
                    Ok(true)
                };
                let result = store.iterate(&mut visitor);
                let _ = done.send(result.is_ok());
            })
        };
        thread::sleep(std::time::Duration::from_millis(50));
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || drop(store.exclusive()))
        };

        let ok = finished
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("nested load blocked behind the exclusive waiter");
        assert!(ok);
        reader.join().unwrap();
        writer.join().unwrap();
    }
}
