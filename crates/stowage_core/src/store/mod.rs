//! The persistent store contract.
//!
//! A [`PersistentStore`] is one durable unit of storage: a directory
//! holding zero or more *extents*, each an independent map of byte keys
//! to byte values addressed by a `u64` extent id. Every embedded engine
//! plugs in by implementing this trait; [`journal::JournalStore`] is the
//! implementation over `stowage_engine`.
//!
//! ## Transactions
//!
//! [`PersistentStore::begin`] returns a [`Transaction`] token. Mutations
//! given a token are staged and become visible atomically on
//! [`PersistentStore::commit`]; [`PersistentStore::abort`] discards them.
//! Both consume the token. Mutations without a token commit on their own.
//! A token presented to a store that did not issue it fails with
//! [`PersistenceError::InvalidToken`](crate::PersistenceError::InvalidToken).

pub mod journal;

use crate::error::PersistenceResult;
use crate::PersistenceError;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

pub use journal::JournalTransaction;

/// Receives the contents of a store during [`PersistentStore::iterate`].
///
/// Closures of type `FnMut(u64, &[u8], &[u8]) -> PersistenceResult<bool>`
/// are visitors that accept every extent.
pub trait Visitor {
    /// Called before the entries of `extent_id`. Returning `false` skips
    /// the extent.
    fn visit_extent(&mut self, extent_id: u64) -> bool {
        let _ = extent_id;
        true
    }

    /// Called for each entry. Returning `Ok(false)` stops the whole
    /// iteration; an error stops it and is propagated.
    ///
    /// # Errors
    ///
    /// Any error aborts the iteration.
    fn visit(&mut self, extent_id: u64, key: &[u8], value: &[u8]) -> PersistenceResult<bool>;
}

impl<F> Visitor for F
where
    F: FnMut(u64, &[u8], &[u8]) -> PersistenceResult<bool>,
{
    fn visit(&mut self, extent_id: u64, key: &[u8], value: &[u8]) -> PersistenceResult<bool> {
        self(extent_id, key, value)
    }
}

/// A transaction token issued by [`PersistentStore::begin`].
///
/// One variant per engine. A token is bound to the store instance that
/// issued it; reopening the store invalidates outstanding tokens.
#[derive(Debug)]
#[non_exhaustive]
pub enum Transaction {
    /// Token of a [`journal::JournalStore`].
    Journal(JournalTransaction),
}

impl Transaction {
    /// Id of the store that issued the token.
    #[must_use]
    pub fn store_id(&self) -> &str {
        match self {
            Self::Journal(txn) => txn.store_id(),
        }
    }

    /// Number of staged writes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Journal(txn) => txn.len(),
        }
    }

    /// Returns `true` if nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One durable store of extents.
///
/// All methods take `&self`; implementations synchronise internally and
/// must be usable from several threads at once.
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// The store id.
    fn id(&self) -> &str;

    /// The store directory.
    fn data_dir(&self) -> &Path;

    /// Storage format tag of the backing engine.
    fn storage_format(&self) -> &'static str;

    /// Storage version of the backing engine.
    fn storage_version(&self) -> u32;

    /// Implementation version of this adapter.
    fn impl_version(&self) -> u32;

    /// Returns `true` between a successful open and release.
    fn is_open(&self) -> bool;

    /// Returns `true` if the store rejects writes.
    fn is_read_only(&self) -> bool;

    /// Opens the store, creating its directory if needed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StorageOpen`] if the directory is locked
    /// by another instance or its contents cannot be read.
    fn open(&self) -> PersistenceResult<()>;

    /// Closes every extent and then the engine.
    ///
    /// Best effort: failures are logged and returned, never raised. A
    /// released store can be reopened. Idempotent.
    fn release(&self) -> Vec<PersistenceError>;

    /// Removes the store's files, releasing it first if open.
    ///
    /// Returns `false` when there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns an error if files exist but cannot be removed.
    fn delete(&self) -> PersistenceResult<bool>;

    /// Adds every extent id in the store to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn load_extent_ids(&self, out: &mut BTreeSet<u64>) -> PersistenceResult<()>;

    /// Creates an extent. Creating an existing extent is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the engine fails.
    fn create_extent(&self, extent_id: u64) -> PersistenceResult<()>;

    /// Deletes an extent and its contents. Unknown extents are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the engine fails.
    fn delete_extent(&self, extent_id: u64) -> PersistenceResult<()>;

    /// Moves every entry of `old_id` into `new_id` and deletes `old_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ExtentNotOpen`] if `old_id` is unknown.
    fn move_extent(&self, old_id: u64, new_id: u64) -> PersistenceResult<()>;

    /// Removes every entry of an extent, keeping the extent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ExtentNotOpen`] if the extent is unknown.
    fn truncate_extent(&self, extent_id: u64) -> PersistenceResult<()>;

    /// Reads one value; `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ExtentNotOpen`] if the extent is unknown.
    fn load(&self, extent_id: u64, key: &[u8]) -> PersistenceResult<Option<Bytes>>;

    /// Upserts one key, staged in `txn` if given.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ExtentNotOpen`] for an unknown extent,
    /// [`PersistenceError::InvalidToken`] for a foreign token.
    fn store(
        &self,
        extent_id: u64,
        key: &[u8],
        value: &[u8],
        txn: Option<&mut Transaction>,
    ) -> PersistenceResult<()>;

    /// Removes one key if present, staged in `txn` if given.
    ///
    /// # Errors
    ///
    /// As for [`PersistentStore::store`].
    fn erase(&self, extent_id: u64, key: &[u8], txn: Option<&mut Transaction>)
        -> PersistenceResult<()>;

    /// Visits every entry, extent by extent in ascending id order and key
    /// order within an extent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Visitor`] wrapping a visitor's error.
    fn iterate(&self, visitor: &mut dyn Visitor) -> PersistenceResult<()>;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or read-only.
    fn begin(&self) -> PersistenceResult<Transaction>;

    /// Commits a transaction atomically.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidToken`] for a foreign token, or
    /// the engine failure; nothing is applied in either case.
    fn commit(&self, txn: Transaction) -> PersistenceResult<()>;

    /// Discards a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidToken`] for a foreign token.
    fn abort(&self, txn: Transaction) -> PersistenceResult<()>;

    /// Makes the on-disk state compact and self-contained.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    fn checkpoint(&self) -> PersistenceResult<()>;

    /// Writes a consistent engine-native copy of the store into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    fn backup_to(&self, dir: &Path) -> PersistenceResult<()>;

    /// Populates this (unopened) store from `source` and opens it.
    ///
    /// Stores of the same format are copied file by file; otherwise every
    /// entry is copied through the contract in one transaction. On failure
    /// this store's directory is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy or open fails.
    fn copy_and_open_from(&self, source: &dyn PersistentStore) -> PersistenceResult<()>;
}
