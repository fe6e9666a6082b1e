//! Model-checking harness.
//!
//! Applies operations to a store and to an in-memory model side by side,
//! then checks that the store holds exactly what the model says.

use crate::generators::StoreOperation;
use std::collections::{BTreeMap, BTreeSet};
use stowage_core::{PersistenceError, PersistenceResult, PersistentStore};

type Extent = BTreeMap<Vec<u8>, Vec<u8>>;

/// A store under test plus the model of what it should contain.
pub struct ModelHarness<'a> {
    store: &'a dyn PersistentStore,
    model: BTreeMap<u64, Extent>,
}

impl<'a> ModelHarness<'a> {
    /// Wraps an open, empty store.
    pub fn new(store: &'a dyn PersistentStore) -> Self {
        Self {
            store,
            model: BTreeMap::new(),
        }
    }

    /// Applies `op` to both the store and the model.
    ///
    /// Operations on an extent the model does not have must fail with
    /// [`PersistenceError::ExtentNotOpen`]; everything else must succeed.
    pub fn apply(&mut self, op: &StoreOperation) {
        match op {
            StoreOperation::CreateExtent { extent } => {
                self.store.create_extent(*extent).expect("create_extent failed");
                self.model.entry(*extent).or_default();
            }
            StoreOperation::DeleteExtent { extent } => {
                self.store.delete_extent(*extent).expect("delete_extent failed");
                self.model.remove(extent);
            }
            StoreOperation::TruncateExtent { extent } => {
                let result = self.store.truncate_extent(*extent);
                match self.model.get_mut(extent) {
                    Some(entries) => {
                        result.expect("truncate_extent failed");
                        entries.clear();
                    }
                    None => expect_not_open(result, *extent),
                }
            }
            StoreOperation::Store { extent, key, value } => {
                let result = self.store.store(*extent, key, value, None);
                match self.model.get_mut(extent) {
                    Some(entries) => {
                        result.expect("store failed");
                        entries.insert(key.clone(), value.clone());
                    }
                    None => expect_not_open(result, *extent),
                }
            }
            StoreOperation::Erase { extent, key } => {
                let result = self.store.erase(*extent, key, None);
                match self.model.get_mut(extent) {
                    Some(entries) => {
                        result.expect("erase failed");
                        entries.remove(key);
                    }
                    None => expect_not_open(result, *extent),
                }
            }
            StoreOperation::Load { extent, key } => {
                let result = self.store.load(*extent, key);
                match self.model.get(extent) {
                    Some(entries) => {
                        let actual = result.expect("load failed");
                        assert_eq!(
                            actual.as_deref(),
                            entries.get(key).map(Vec::as_slice),
                            "load mismatch in extent {extent}"
                        );
                    }
                    None => expect_not_open(result, *extent),
                }
            }
            StoreOperation::MoveExtent { from, to } => {
                let result = self.store.move_extent(*from, *to);
                match self.model.remove(from) {
                    Some(moved) => {
                        result.expect("move_extent failed");
                        self.model.entry(*to).or_default().extend(moved);
                    }
                    None => expect_not_open(result, *from),
                }
            }
        }
    }

    /// Checks every extent and entry of the store against the model.
    pub fn verify(&self) {
        let mut ids = BTreeSet::new();
        self.store
            .load_extent_ids(&mut ids)
            .expect("load_extent_ids failed");
        assert_eq!(
            ids,
            self.model.keys().copied().collect::<BTreeSet<_>>(),
            "extent set mismatch"
        );

        let mut seen: BTreeMap<u64, Extent> =
            self.model.keys().map(|id| (*id, Extent::new())).collect();
        self.store
            .iterate(&mut |extent: u64, key: &[u8], value: &[u8]| -> PersistenceResult<bool> {
                seen.entry(extent)
                    .or_default()
                    .insert(key.to_vec(), value.to_vec());
                Ok(true)
            })
            .expect("iterate failed");
        assert_eq!(seen, self.model, "store contents differ from model");
    }

    /// The model.
    pub fn model(&self) -> &BTreeMap<u64, BTreeMap<Vec<u8>, Vec<u8>>> {
        &self.model
    }

    /// Total number of entries in the model.
    pub fn entry_count(&self) -> usize {
        self.model.values().map(BTreeMap::len).sum()
    }
}

fn expect_not_open<T: std::fmt::Debug>(result: Result<T, PersistenceError>, extent: u64) {
    match result {
        Err(PersistenceError::ExtentNotOpen { .. }) => {}
        other => panic!("expected ExtentNotOpen for extent {extent}, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::with_temp_manager;

    #[test]
    fn harness_tracks_operations() {
        with_temp_manager(|manager| {
            let store = manager.open_store("model").unwrap();
            let mut harness = ModelHarness::new(store.as_ref());
            let ops = [
                StoreOperation::CreateExtent { extent: 1 },
                StoreOperation::Store {
                    extent: 1,
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                StoreOperation::Store {
                    extent: 2,
                    key: b"a".to_vec(),
                    value: b"x".to_vec(),
                },
                StoreOperation::MoveExtent { from: 1, to: 3 },
                StoreOperation::Load {
                    extent: 3,
                    key: b"a".to_vec(),
                },
            ];
            for op in &ops {
                harness.apply(op);
            }
            harness.verify();
            assert_eq!(harness.entry_count(), 1);
            assert!(harness.model().contains_key(&3));
        });
    }
}
