//! The engine facade.

use crate::error::{EngineError, EngineResult};
use crate::journal::Journal;
use crate::keyspace::{Keyspace, NamespaceHandle, DEFAULT_NAMESPACE};
use crate::lock::{DirLock, JOURNAL_FILE};
use crate::options::EngineOptions;
use crate::record::JournalRecord;
use crate::transaction::{EngineTransaction, TransactionId, WriteOp};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stowage_storage::{FileDevice, JournalDevice, MemoryDevice};

/// Format tag of the journal engine's on-disk layout.
pub const ENGINE_FORMAT: &str = "journal";

/// Version of the journal engine's on-disk layout.
pub const ENGINE_FORMAT_VERSION: u32 = 1;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// What recovery found when the engine was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Committed transactions replayed.
    pub committed: u64,
    /// Transactions discarded for lack of a commit frame.
    pub discarded: u64,
    /// Bytes of torn tail dropped.
    pub torn_bytes: u64,
}

/// Result of a journal checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
    /// Live entries written to the compacted journal.
    pub entries: u64,
}

/// Point-in-time engine figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Namespaces, including the default one.
    pub namespaces: usize,
    /// Live entries across all namespaces.
    pub entries: u64,
    /// Sum of live key and value lengths.
    pub data_bytes: u64,
    /// Current journal size.
    pub journal_bytes: u64,
}

/// An embedded transactional key/value engine.
///
/// Data is organised in named namespaces, each an ordered map of byte
/// keys to byte values. Every change is recorded in a CRC-framed journal
/// before it becomes visible, and the journal is replayed on open.
///
/// # Concurrency
///
/// An `Engine` is `Send + Sync`. Commits are serialised by the journal
/// mutex; reads only take the state read lock and never block on I/O.
///
/// # Example
///
/// ```rust,no_run
/// use stowage_engine::{Engine, EngineOptions};
/// use std::path::Path;
///
/// let engine = Engine::open(Path::new("store"), EngineOptions::default())?;
/// let users = engine.create_namespace("users")?;
/// engine.put(&users, b"alice", b"admin")?;
///
/// let mut txn = engine.begin()?;
/// txn.put(&users, b"bob", b"reader");
/// txn.delete(&users, b"alice");
/// engine.commit(txn)?;
/// # Ok::<(), stowage_engine::EngineError>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    id: u64,
    lock: Option<DirLock>,
    options: EngineOptions,
    journal: Mutex<Journal>,
    keyspace: RwLock<Keyspace>,
    next_txid: AtomicU64,
    recovery: RecoveryInfo,
}

impl Engine {
    /// Opens the engine in directory `path`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Locked`] if another instance holds the directory
    /// - [`EngineError::MissingDirectory`] if the directory is absent and
    ///   may not be created
    /// - [`EngineError::Corruption`] / [`EngineError::ChecksumMismatch`] if
    ///   the journal is damaged
    pub fn open(path: &Path, options: EngineOptions) -> EngineResult<Self> {
        let create = options.create_if_missing && !options.read_only;
        let lock = DirLock::acquire(path, create, options.read_only)?;

        let journal_path = path.join(JOURNAL_FILE);
        let device: Box<dyn JournalDevice> = if options.read_only && !journal_path.exists() {
            Box::new(MemoryDevice::new())
        } else {
            Box::new(FileDevice::open(&journal_path)?)
        };

        let engine = Self::assemble(Some(lock), device, options)?;
        tracing::debug!(
            path = %path.display(),
            committed = engine.recovery.committed,
            discarded = engine.recovery.discarded,
            "journal engine opened"
        );
        Ok(engine)
    }

    /// Opens an engine over an arbitrary journal device.
    ///
    /// No directory lock is taken. Used for ephemeral engines.
    ///
    /// # Errors
    ///
    /// Returns an error if the device's journal is damaged.
    pub fn open_device(device: Box<dyn JournalDevice>, options: EngineOptions) -> EngineResult<Self> {
        Self::assemble(None, device, options)
    }

    fn assemble(
        lock: Option<DirLock>,
        device: Box<dyn JournalDevice>,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        let mut journal = Journal::new(device, options.sync_on_commit);
        let recovered = journal.recover(!options.read_only)?;
        let mut keyspace = Keyspace::default();
        let summary = keyspace.replay(recovered.records)?;

        Ok(Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            lock,
            options,
            journal: Mutex::new(journal),
            keyspace: RwLock::new(keyspace),
            next_txid: AtomicU64::new(summary.max_txid + 1),
            recovery: RecoveryInfo {
                committed: summary.committed,
                discarded: summary.discarded,
                torn_bytes: recovered.torn_bytes,
            },
        })
    }

    /// Directory this engine was opened in, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.lock.as_ref().map(DirLock::path)
    }

    /// Returns `true` if the engine was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    /// What recovery found at open.
    #[must_use]
    pub fn recovery_info(&self) -> RecoveryInfo {
        self.recovery
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        if self.options.read_only {
            Err(EngineError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn check_handle(&self, handle: &NamespaceHandle) -> EngineResult<()> {
        if handle.engine_id == self.id {
            Ok(())
        } else {
            Err(EngineError::ForeignObject {
                what: "namespace handle",
            })
        }
    }

    fn handle(&self, name: &str, generation: u64) -> NamespaceHandle {
        NamespaceHandle {
            engine_id: self.id,
            name: Arc::from(name),
            generation,
        }
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    /// Names of every namespace, including [`DEFAULT_NAMESPACE`], in
    /// lexicographic order.
    #[must_use]
    pub fn list_namespaces(&self) -> Vec<String> {
        self.keyspace.read().names()
    }

    /// Creates a namespace and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NamespaceExists`] if it already exists.
    pub fn create_namespace(&self, name: &str) -> EngineResult<NamespaceHandle> {
        self.ensure_writable()?;
        if name.is_empty() {
            return Err(EngineError::invalid_argument("namespace name is empty"));
        }

        let mut journal = self.journal.lock();
        let mut keyspace = self.keyspace.write();
        if keyspace.generation(name).is_some() {
            return Err(EngineError::NamespaceExists {
                name: name.to_string(),
            });
        }
        journal.append(&[JournalRecord::CreateNamespace {
            name: name.to_string(),
        }])?;
        let generation = keyspace.create(name)?;
        Ok(self.handle(name, generation))
    }

    /// Returns a handle to an existing namespace.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSuchNamespace`] if it does not exist.
    pub fn namespace(&self, name: &str) -> EngineResult<NamespaceHandle> {
        let generation =
            self.keyspace
                .read()
                .generation(name)
                .ok_or_else(|| EngineError::NoSuchNamespace {
                    name: name.to_string(),
                })?;
        Ok(self.handle(name, generation))
    }

    /// Drops a namespace and everything in it.
    ///
    /// Handles issued for it become stale.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSuchNamespace`] if it does not exist and
    /// [`EngineError::ReservedNamespace`] for the default namespace.
    pub fn drop_namespace(&self, name: &str) -> EngineResult<()> {
        self.ensure_writable()?;
        if name == DEFAULT_NAMESPACE {
            return Err(EngineError::ReservedNamespace {
                name: name.to_string(),
            });
        }

        let mut journal = self.journal.lock();
        let mut keyspace = self.keyspace.write();
        if keyspace.generation(name).is_none() {
            return Err(EngineError::NoSuchNamespace {
                name: name.to_string(),
            });
        }
        journal.append(&[JournalRecord::DropNamespace {
            name: name.to_string(),
        }])?;
        keyspace.drop_namespace(name)
    }

    /// Removes every entry of a namespace, keeping the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or the journal write fails.
    pub fn clear_namespace(&self, handle: &NamespaceHandle) -> EngineResult<()> {
        self.ensure_writable()?;
        self.check_handle(handle)?;

        let mut journal = self.journal.lock();
        let mut keyspace = self.keyspace.write();
        keyspace.resolve(handle)?;
        journal.append(&[JournalRecord::ClearNamespace {
            name: handle.name().to_string(),
        }])?;
        keyspace.clear(handle.name())
    }

    /// Releases a handle.
    ///
    /// Handles hold no engine resources; this only reports whether the
    /// handle was still valid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StaleHandle`] if the namespace was dropped.
    pub fn close_namespace(&self, handle: NamespaceHandle) -> EngineResult<()> {
        self.check_handle(&handle)?;
        self.keyspace.read().resolve(&handle).map(|_| ())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads one value.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or foreign.
    pub fn get(&self, handle: &NamespaceHandle, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.check_handle(handle)?;
        let keyspace = self.keyspace.read();
        Ok(keyspace.resolve(handle)?.entries.get(key).cloned())
    }

    /// Returns a consistent copy of every entry in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or foreign.
    pub fn scan(&self, handle: &NamespaceHandle) -> EngineResult<Vec<(Bytes, Bytes)>> {
        self.check_handle(handle)?;
        let keyspace = self.keyspace.read();
        Ok(keyspace
            .resolve(handle)?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Number of entries in a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or foreign.
    pub fn len(&self, handle: &NamespaceHandle) -> EngineResult<usize> {
        self.check_handle(handle)?;
        Ok(self.keyspace.read().resolve(handle)?.entries.len())
    }

    /// Returns `true` if the namespace holds no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or foreign.
    pub fn is_empty(&self, handle: &NamespaceHandle) -> EngineResult<bool> {
        self.len(handle).map(|n| n == 0)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Upserts one key in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn put(&self, handle: &NamespaceHandle, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut txn = self.begin()?;
        txn.put(handle, key, value);
        self.commit(txn)
    }

    /// Removes one key in its own transaction. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn delete(&self, handle: &NamespaceHandle, key: &[u8]) -> EngineResult<()> {
        let mut txn = self.begin()?;
        txn.delete(handle, key);
        self.commit(txn)
    }

    /// Starts a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ReadOnly`] on a read-only engine.
    pub fn begin(&self) -> EngineResult<EngineTransaction> {
        self.ensure_writable()?;
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed));
        Ok(EngineTransaction::new(self.id, txid))
    }

    /// Commits a transaction atomically.
    ///
    /// Either every staged write becomes visible and durable, or none does.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ForeignObject`] if the transaction or one of its
    ///   handles came from another engine
    /// - [`EngineError::StaleHandle`] if a touched namespace was dropped
    /// - Any journal write error; the state is left untouched in that case
    pub fn commit(&self, txn: EngineTransaction) -> EngineResult<()> {
        self.ensure_writable()?;
        if txn.engine_id != self.id {
            return Err(EngineError::ForeignObject {
                what: "transaction",
            });
        }
        if txn.is_empty() {
            return Ok(());
        }
        for op in &txn.ops {
            self.check_handle(op.namespace())?;
        }

        let mut journal = self.journal.lock();
        let mut keyspace = self.keyspace.write();
        for op in &txn.ops {
            keyspace.resolve(op.namespace())?;
        }

        let txid = txn.txid;
        let mut records = Vec::with_capacity(txn.ops.len() + 2);
        records.push(JournalRecord::Begin { txid });
        for op in &txn.ops {
            records.push(match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => JournalRecord::Put {
                    txid,
                    namespace: namespace.name().to_string(),
                    key: key.clone(),
                    value: value.clone(),
                },
                WriteOp::Erase { namespace, key } => JournalRecord::Erase {
                    txid,
                    namespace: namespace.name().to_string(),
                    key: key.clone(),
                },
            });
        }
        records.push(JournalRecord::Commit { txid });
        journal.append(&records)?;

        for op in &txn.ops {
            keyspace.apply(op);
        }

        self.auto_checkpoint(&mut journal, &keyspace);
        Ok(())
    }

    /// Compacts once the journal passes the configured threshold. The
    /// triggering commit is already durable, so failures are only logged;
    /// the next commit retries.
    fn auto_checkpoint(&self, journal: &mut Journal, keyspace: &Keyspace) {
        let threshold = self.options.auto_checkpoint_bytes;
        if threshold == 0 {
            return;
        }
        let result = match journal.size() {
            Ok(size) if size > threshold => self.compact(journal, keyspace).map(Some),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(stats)) => tracing::debug!(
                before = stats.bytes_before,
                after = stats.bytes_after,
                "automatic checkpoint"
            ),
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "automatic checkpoint failed"),
        }
    }

    /// Discards a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ForeignObject`] if it came from another engine.
    pub fn rollback(&self, txn: EngineTransaction) -> EngineResult<()> {
        if txn.engine_id != self.id {
            return Err(EngineError::ForeignObject {
                what: "transaction",
            });
        }
        Ok(())
    }

    /// Returns `true` if `txn` was started by this engine.
    #[must_use]
    pub fn owns(&self, txn: &EngineTransaction) -> bool {
        txn.engine_id == self.id
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rewrites the journal to hold only the live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is read-only or the rewrite fails. The
    /// previous journal stays in place on failure.
    pub fn checkpoint(&self) -> EngineResult<CheckpointStats> {
        self.ensure_writable()?;
        let mut journal = self.journal.lock();
        let keyspace = self.keyspace.read();
        let stats = self.compact(&mut journal, &keyspace)?;
        tracing::debug!(
            before = stats.bytes_before,
            after = stats.bytes_after,
            entries = stats.entries,
            "journal checkpoint"
        );
        Ok(stats)
    }

    fn compact(&self, journal: &mut Journal, keyspace: &Keyspace) -> EngineResult<CheckpointStats> {
        let bytes_before = journal.size()?;
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed));
        let bytes_after = journal.rewrite(&keyspace.compacted_records(txid))?;
        Ok(CheckpointStats {
            bytes_before,
            bytes_after,
            entries: keyspace.entry_count(),
        })
    }

    /// Writes a consistent copy of the engine into directory `dest`.
    ///
    /// Commits are held off for the duration of the copy. The directory
    /// is created if needed; it must not already hold a journal. Opening
    /// an engine on `dest` yields exactly the committed state at the time
    /// of the call.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` already holds a journal or the copy fails.
    pub fn backup_to(&self, dest: &Path) -> EngineResult<u64> {
        fs::create_dir_all(dest)?;
        let journal = self.journal.lock();
        let bytes = journal.copy_to(&dest.join(JOURNAL_FILE))?;
        tracing::debug!(dest = %dest.display(), bytes, "engine backup written");
        Ok(bytes)
    }

    /// Point-in-time statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal size cannot be read.
    pub fn stats(&self) -> EngineResult<EngineStats> {
        let journal_bytes = self.journal.lock().size()?;
        let keyspace = self.keyspace.read();
        Ok(EngineStats {
            namespaces: keyspace.names().len(),
            entries: keyspace.entry_count(),
            data_bytes: keyspace.data_bytes(),
            journal_bytes,
        })
    }

    /// Syncs the journal and closes the engine, releasing the directory lock.
    ///
    /// Dropping the engine also releases the lock but skips the final sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails. The lock is released
    /// either way.
    pub fn close(self) -> EngineResult<()> {
        if self.options.read_only {
            return Ok(());
        }
        let mut journal = self.journal.lock();
        journal.sync_all()
    }
}
