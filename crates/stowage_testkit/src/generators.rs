//! Property-based test generators using proptest.
//!
//! Provides strategies for generating extents, keys, values and operation
//! sequences against a [`stowage_core::PersistentStore`].

use proptest::prelude::*;

/// Strategy for user extent ids. The control extent `0` is excluded.
pub fn extent_id_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        4 => 1u64..8,
        1 => 8u64..=u64::MAX,
    ]
}

/// Strategy for small extent ids, so generated operations collide.
pub fn small_extent_strategy() -> impl Strategy<Value = u64> {
    1u64..4
}

/// Strategy for keys: arbitrary non-empty bytes.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for keys drawn from a small alphabet, so generated operations
/// hit the same keys.
pub fn colliding_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'd', 1..3)
}

/// Strategy for values: arbitrary bytes, possibly empty.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for valid store ids.
pub fn store_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// One operation against a store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Create an extent
    CreateExtent {
        /// Extent id
        extent: u64,
    },
    /// Delete an extent
    DeleteExtent {
        /// Extent id
        extent: u64,
    },
    /// Truncate an extent
    TruncateExtent {
        /// Extent id
        extent: u64,
    },
    /// Store a pair
    Store {
        /// Extent id
        extent: u64,
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes
        value: Vec<u8>,
    },
    /// Erase a key
    Erase {
        /// Extent id
        extent: u64,
        /// Key bytes
        key: Vec<u8>,
    },
    /// Load a key
    Load {
        /// Extent id
        extent: u64,
        /// Key bytes
        key: Vec<u8>,
    },
    /// Move an extent to a new id
    MoveExtent {
        /// Source extent id
        from: u64,
        /// Target extent id
        to: u64,
    },
}

/// Strategy for generating store operations.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        2 => small_extent_strategy().prop_map(|extent| StoreOperation::CreateExtent { extent }),
        1 => small_extent_strategy().prop_map(|extent| StoreOperation::DeleteExtent { extent }),
        1 => small_extent_strategy().prop_map(|extent| StoreOperation::TruncateExtent { extent }),
        6 => (small_extent_strategy(), colliding_key_strategy(), value_strategy())
            .prop_map(|(extent, key, value)| StoreOperation::Store { extent, key, value }),
        2 => (small_extent_strategy(), colliding_key_strategy())
            .prop_map(|(extent, key)| StoreOperation::Erase { extent, key }),
        3 => (small_extent_strategy(), colliding_key_strategy())
            .prop_map(|(extent, key)| StoreOperation::Load { extent, key }),
        1 => (small_extent_strategy(), small_extent_strategy())
            .prop_filter("move needs distinct extents", |(from, to)| from != to)
            .prop_map(|(from, to)| StoreOperation::MoveExtent { from, to }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Strategy for a batch of `(key, value)` pairs for one transaction.
pub fn batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::vec((key_strategy(), value_strategy()), 1..max_len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Store-backed properties create a directory per case, so most of
    /// them run with this.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
