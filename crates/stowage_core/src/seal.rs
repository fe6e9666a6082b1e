//! Store seal.
//!
//! A sealed store is fully initialised and safe to recover from. The seal
//! lives in the control extent [`META_EXTENT`] next to the partition count
//! and the persistence version the store was written with.

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{PersistentStore, Transaction};
use bytes::Bytes;

/// The control extent holding seal metadata.
pub const META_EXTENT: u64 = 0;

/// Persistence version recorded in new seals.
pub const PERSISTENCE_VERSION: u32 = 14;

const SEAL_KEY: &[u8] = b"SEAL";
const PARTITION_COUNT_KEY: &[u8] = b"PARTITION_COUNT";
const VERSION_KEY: &[u8] = b"SERVICE_VERSION";

/// Seals a store, recording its partition count.
///
/// The writes are staged in `txn` when given and committed on their own
/// otherwise.
///
/// # Errors
///
/// Returns an error if the control extent cannot be created or written.
pub fn seal(
    store: &dyn PersistentStore,
    partition_count: u32,
    txn: Option<&mut Transaction>,
) -> PersistenceResult<()> {
    store.create_extent(META_EXTENT)?;
    let count = partition_count.to_be_bytes();
    let version = PERSISTENCE_VERSION.to_string();

    match txn {
        Some(txn) => {
            store.store(META_EXTENT, PARTITION_COUNT_KEY, &count, Some(&mut *txn))?;
            store.store(META_EXTENT, VERSION_KEY, version.as_bytes(), Some(&mut *txn))?;
            store.store(META_EXTENT, SEAL_KEY, SEAL_KEY, Some(txn))
        }
        None => {
            let mut txn = store.begin()?;
            store.store(META_EXTENT, PARTITION_COUNT_KEY, &count, Some(&mut txn))?;
            store.store(META_EXTENT, VERSION_KEY, version.as_bytes(), Some(&mut txn))?;
            store.store(META_EXTENT, SEAL_KEY, SEAL_KEY, Some(&mut txn))?;
            store.commit(txn)
        }
    }
}

/// Removes the seal and its metadata in one transaction.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub fn unseal(store: &dyn PersistentStore) -> PersistenceResult<()> {
    match store.load(META_EXTENT, SEAL_KEY) {
        Err(PersistenceError::ExtentNotOpen { .. }) => return Ok(()),
        Err(e) => return Err(e),
        Ok(_) => {}
    }
    let mut txn = store.begin()?;
    for key in [PARTITION_COUNT_KEY, VERSION_KEY, SEAL_KEY] {
        store.erase(META_EXTENT, key, Some(&mut txn))?;
    }
    store.commit(txn)
}

/// Returns `true` if the store is sealed.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn is_sealed(store: &dyn PersistentStore) -> PersistenceResult<bool> {
    Ok(load_meta(store, SEAL_KEY)?.is_some())
}

/// The recorded partition count, if any.
///
/// # Errors
///
/// Returns [`PersistenceError::InvalidMetadata`] if the stored value is
/// malformed.
pub fn partition_count(store: &dyn PersistentStore) -> PersistenceResult<Option<u32>> {
    let Some(value) = load_meta(store, PARTITION_COUNT_KEY)? else {
        return Ok(None);
    };
    let bytes: [u8; 4] = value.as_ref().try_into().map_err(|_| {
        PersistenceError::invalid_metadata(
            store.data_dir(),
            format!("partition count of store {} is {} bytes", store.id(), value.len()),
        )
    })?;
    Ok(Some(u32::from_be_bytes(bytes)))
}

/// The persistence version the store was sealed with, or `0` if it was
/// never sealed or the version is unreadable.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn persistence_version(store: &dyn PersistentStore) -> PersistenceResult<u32> {
    Ok(load_meta(store, VERSION_KEY)?
        .and_then(|value| std::str::from_utf8(&value).ok()?.trim().parse().ok())
        .unwrap_or(0))
}

/// Loads a control key, treating a missing control extent as empty.
fn load_meta(store: &dyn PersistentStore, key: &[u8]) -> PersistenceResult<Option<Bytes>> {
    match store.load(META_EXTENT, key) {
        Err(PersistenceError::ExtentNotOpen { .. }) => Ok(None),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::store::journal::JournalStore;
    use tempfile::tempdir;

    fn open_store(dir: &std::path::Path) -> JournalStore {
        let store = JournalStore::new("s", dir.join("s"), StoreOptions::default());
        store.open().unwrap();
        store
    }

    #[test]
    fn unsealed_store() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(!is_sealed(&store).unwrap());
        assert_eq!(partition_count(&store).unwrap(), None);
        assert_eq!(persistence_version(&store).unwrap(), 0);
        unseal(&store).unwrap();
    }

    #[test]
    fn seal_and_unseal() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seal(&store, 257, None).unwrap();
        assert!(is_sealed(&store).unwrap());
        assert_eq!(partition_count(&store).unwrap(), Some(257));
        assert_eq!(persistence_version(&store).unwrap(), PERSISTENCE_VERSION);

        unseal(&store).unwrap();
        assert!(!is_sealed(&store).unwrap());
        assert_eq!(partition_count(&store).unwrap(), None);
        assert_eq!(persistence_version(&store).unwrap(), 0);
    }

    #[test]
    fn seal_in_caller_transaction() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let mut txn = store.begin().unwrap();
        seal(&store, 7, Some(&mut txn)).unwrap();
        assert!(!is_sealed(&store).unwrap());
        store.commit(txn).unwrap();
        assert!(is_sealed(&store).unwrap());
    }

    #[test]
    fn malformed_partition_count() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.create_extent(META_EXTENT).unwrap();
        store.store(META_EXTENT, PARTITION_COUNT_KEY, b"xy", None).unwrap();
        assert!(matches!(
            partition_count(&store),
            Err(PersistenceError::InvalidMetadata { .. })
        ));
    }
}
