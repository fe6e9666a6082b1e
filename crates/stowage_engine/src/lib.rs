//! # Stowage Engine
//!
//! An embedded, journal-based, transactional key/value engine.
//!
//! An engine lives in one directory and holds any number of named
//! *namespaces*, each an ordered map of byte keys to byte values. The
//! namespace [`DEFAULT_NAMESPACE`] always exists and cannot be dropped.
//!
//! ## Guarantees
//!
//! - **Atomic commits**: a transaction reaches the journal as one
//!   contiguous `Begin .. Commit` append and is applied only when the
//!   commit frame is intact
//! - **Crash recovery**: the journal is replayed on open; torn tails are
//!   truncated, checksum failures refuse the open
//! - **Single writer**: an fs2 advisory lock on `LOCK` keeps other
//!   processes (and other instances in this process) out
//! - **Consistent backups**: [`Engine::backup_to`] copies the journal
//!   while commits are held off
//!
//! The whole live state is kept in memory; the journal is the only
//! on-disk structure and [`Engine::checkpoint`] compacts it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod journal;
mod keyspace;
mod lock;
mod options;
mod record;
mod transaction;

pub use engine::{
    CheckpointStats, Engine, EngineStats, RecoveryInfo, ENGINE_FORMAT, ENGINE_FORMAT_VERSION,
};
pub use error::{EngineError, EngineResult};
pub use journal::{verify_journal, JournalReader, JournalReport};
pub use keyspace::{NamespaceHandle, DEFAULT_NAMESPACE};
pub use lock::{JOURNAL_FILE, LOCK_FILE};
pub use options::EngineOptions;
pub use record::{JournalRecord, RecordType};
pub use transaction::{EngineTransaction, TransactionId};
