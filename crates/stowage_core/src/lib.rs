//! # Stowage Core
//!
//! A pluggable, transactional persistence layer for partitioned data.
//!
//! ## Model
//!
//! - A [`PersistentStore`] is one directory holding *extents*: independent
//!   byte maps addressed by `u64` ids. Writes are grouped in atomic
//!   transactions and the whole store can be iterated with a [`Visitor`].
//! - A [`PersistenceManager`] owns a directory of stores, opens them on
//!   demand, writes point-in-time snapshots and streams stores in and out.
//! - A [`PersistenceEnvironment`] pairs the active manager with a root of
//!   named snapshots and a trash directory.
//! - [`PersistenceTools`] inspect and validate a snapshot offline.
//!
//! Engines plug in by implementing [`PersistentStore`] and are selected
//! with [`EngineKind`]. The bundled engine is `stowage_engine`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stowage_core::{EnvironmentConfig, PersistenceEnvironment, PersistentStore};
//!
//! let env = PersistenceEnvironment::new(EnvironmentConfig::from_base_dir("/var/lib/svc"))?;
//! let active = env.open_active()?;
//! let store = active.open_store("partition-17")?;
//! store.create_extent(3)?;
//! store.store(3, b"key", b"value", None)?;
//!
//! let snapshot = env.create_snapshot("before-upgrade")?;
//! assert!(snapshot.is_read_only());
//! snapshot.release();
//! # Ok::<(), stowage_core::PersistenceError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod environment;
mod error;
mod managed;
mod manager;
mod metadata;
mod safe;
pub mod seal;
pub mod store;
mod stream;
mod tools;

pub use config::{
    EngineKind, EnvironmentConfig, Heartbeat, ManagerConfig, StoreOptions, DEFAULT_ACTIVE_DIR,
    DEFAULT_SNAPSHOT_DIR, DEFAULT_TRASH_DIR, HEARTBEAT_INTERVAL,
};
pub use environment::PersistenceEnvironment;
pub use error::{PersistenceError, PersistenceResult};
pub use managed::{ManagedStore, StoreState};
pub use manager::{PersistenceManager, ACTIVE_STORE_ID, EVENTS_STORE_ID};
pub use metadata::{
    StoreMetadata, META_FILENAME, META_IMPL_VERSION, META_STORAGE_FORMAT, META_STORAGE_VERSION,
};
pub use safe::{FailureHandler, SafeManager, SafeStore};
pub use store::journal::{JournalStore, JournalTransaction};
pub use store::{PersistentStore, Transaction, Visitor};
pub use stream::{read_store, write_store, StreamStats, STREAM_MAGIC, STREAM_VERSION};
pub use tools::{OfflineInfo, PersistenceTools, StoreStatistics};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
