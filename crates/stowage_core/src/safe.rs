//! Wrappers that report every failure to a [`FailureHandler`].
//!
//! A service that cannot afford to unwind on a storage fault wraps its
//! manager and stores once and routes every error to a single callback
//! (typically one that schedules a restart). Errors are still returned
//! to the caller after the handler has seen them.

use crate::error::{PersistenceError, PersistenceResult};
use crate::manager::PersistenceManager;
use crate::store::{PersistentStore, Transaction, Visitor};
use crate::stream::StreamStats;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Callback invoked with every failure seen through a safe wrapper.
#[derive(Clone)]
pub struct FailureHandler(Arc<dyn Fn(&PersistenceError) + Send + Sync>);

impl FailureHandler {
    /// Wraps a callback.
    pub fn new(f: impl Fn(&PersistenceError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A handler that logs each failure at `error` level.
    #[must_use]
    pub fn logging() -> Self {
        Self::new(|error| tracing::error!(error = %error, "persistence failure"))
    }

    /// Invokes the callback.
    pub fn on_failure(&self, error: &PersistenceError) {
        (self.0)(error);
    }

    fn observe<T>(&self, result: PersistenceResult<T>) -> PersistenceResult<T> {
        if let Err(error) = &result {
            self.on_failure(error);
        }
        result
    }

    fn observe_all(&self, errors: Vec<PersistenceError>) -> Vec<PersistenceError> {
        for error in &errors {
            self.on_failure(error);
        }
        errors
    }
}

impl fmt::Debug for FailureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureHandler(..)")
    }
}

/// A [`PersistentStore`] that reports failures to a [`FailureHandler`].
#[derive(Debug, Clone)]
pub struct SafeStore {
    inner: Arc<dyn PersistentStore>,
    handler: FailureHandler,
}

impl SafeStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn PersistentStore>, handler: FailureHandler) -> Self {
        Self { inner, handler }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn PersistentStore> {
        &self.inner
    }
}

impl PersistentStore for SafeStore {
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
        self.inner.is_open()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn open(&self) -> PersistenceResult<()> {
        self.handler.observe(self.inner.open())
    }

    fn release(&self) -> Vec<PersistenceError> {
        self.handler.observe_all(self.inner.release())
    }

    fn delete(&self) -> PersistenceResult<bool> {
        self.handler.observe(self.inner.delete())
    }

    fn load_extent_ids(&self, out: &mut BTreeSet<u64>) -> PersistenceResult<()> {
        self.handler.observe(self.inner.load_extent_ids(out))
    }

    fn create_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        self.handler.observe(self.inner.create_extent(extent_id))
    }

    fn delete_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        self.handler.observe(self.inner.delete_extent(extent_id))
    }

    fn move_extent(&self, old_id: u64, new_id: u64) -> PersistenceResult<()> {
        self.handler.observe(self.inner.move_extent(old_id, new_id))
    }

    fn truncate_extent(&self, extent_id: u64) -> PersistenceResult<()> {
        self.handler.observe(self.inner.truncate_extent(extent_id))
    }

    fn load(&self, extent_id: u64, key: &[u8]) -> PersistenceResult<Option<Bytes>> {
        self.handler.observe(self.inner.load(extent_id, key))
    }

    fn store(
        &self,
        extent_id: u64,
        key: &[u8],
        value: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        self.handler.observe(self.inner.store(extent_id, key, value, txn))
    }

    fn erase(
        &self,
        extent_id: u64,
        key: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()> {
        self.handler.observe(self.inner.erase(extent_id, key, txn))
    }

    fn iterate(&self, visitor: &mut dyn Visitor) -> PersistenceResult<()> {
        self.handler.observe(self.inner.iterate(visitor))
    }

    fn begin(&self) -> PersistenceResult<Transaction> {
        self.handler.observe(self.inner.begin())
    }

    fn commit(&self, txn: Transaction) -> PersistenceResult<()> {
        self.handler.observe(self.inner.commit(txn))
    }

    fn abort(&self, txn: Transaction) -> PersistenceResult<()> {
        self.handler.observe(self.inner.abort(txn))
    }

    fn checkpoint(&self) -> PersistenceResult<()> {
        self.handler.observe(self.inner.checkpoint())
    }

    fn backup_to(&self, dir: &Path) -> PersistenceResult<()> {
        self.handler.observe(self.inner.backup_to(dir))
    }

    fn copy_and_open_from(&self, source: &dyn PersistentStore) -> PersistenceResult<()> {
        self.handler.observe(self.inner.copy_and_open_from(source))
    }
}

/// A [`PersistenceManager`] front whose stores and operations report
/// failures to one [`FailureHandler`].
#[derive(Debug, Clone)]
pub struct SafeManager {
    inner: Arc<PersistenceManager>,
    handler: FailureHandler,
}

impl SafeManager {
    /// Wraps `inner`.
    pub fn new(inner: Arc<PersistenceManager>, handler: FailureHandler) -> Self {
        Self { inner, handler }
    }

    /// The wrapped manager.
    #[must_use]
    pub fn inner(&self) -> &Arc<PersistenceManager> {
        &self.inner
    }

    /// Opens store `id`, wrapped with this manager's handler.
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::open_store`].
    pub fn open_store(&self, id: &str) -> PersistenceResult<SafeStore> {
        let store = self.handler.observe(self.inner.open_store(id))?;
        Ok(SafeStore::new(store, self.handler.clone()))
    }

    /// See [`PersistenceManager::close_store`].
    pub fn close_store(&self, id: &str) -> Vec<PersistenceError> {
        self.handler.observe_all(self.inner.close_store(id))
    }

    /// See [`PersistenceManager::delete_store`].
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::delete_store`].
    pub fn delete_store(&self, id: &str, safe: bool) -> PersistenceResult<bool> {
        self.handler.observe(self.inner.delete_store(id, safe))
    }

    /// See [`PersistenceManager::list`].
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::list`].
    pub fn list(&self) -> PersistenceResult<Vec<String>> {
        self.handler.observe(self.inner.list())
    }

    /// See [`PersistenceManager::list_open`].
    #[must_use]
    pub fn list_open(&self) -> Vec<String> {
        self.inner.list_open()
    }

    /// See [`PersistenceManager::write_store`].
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::write_store`].
    pub fn write_store(&self, id: &str, out: &mut dyn Write) -> PersistenceResult<StreamStats> {
        self.handler.observe(self.inner.write_store(id, out))
    }

    /// See [`PersistenceManager::read_store`].
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::read_store`].
    pub fn read_store(&self, id: &str, input: &mut dyn Read) -> PersistenceResult<StreamStats> {
        self.handler.observe(self.inner.read_store(id, input))
    }

    /// See [`PersistenceManager::create_snapshot`].
    ///
    /// # Errors
    ///
    /// As for [`PersistenceManager::create_snapshot`].
    pub fn create_snapshot(&self, target: &Path) -> PersistenceResult<()> {
        self.handler.observe(self.inner.create_snapshot(target))
    }

    /// See [`PersistenceManager::release`].
    pub fn release(&self) -> Vec<PersistenceError> {
        self.handler.observe_all(self.inner.release())
    }
}
