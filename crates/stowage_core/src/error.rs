//! Error types for the persistence layer.

use std::io;
use std::path::PathBuf;
use stowage_engine::EngineError;
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors raised by stores, managers, environments and tools.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A store could not be opened: its directory is locked by another
    /// instance or its on-disk state is unreadable.
    #[error("unable to open store {store_id} in {}: {message}", path.display())]
    StorageOpen {
        /// Store id.
        store_id: String,
        /// Store directory.
        path: PathBuf,
        /// What went wrong.
        message: String,
        /// Underlying engine error, if any.
        #[source]
        source: Option<EngineError>,
    },

    /// An engine operation failed.
    #[error("{context}: {source}")]
    Engine {
        /// What was being done, including store and extent.
        context: String,
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// A file system operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An operation named an extent that is not open in the store.
    #[error("unknown extent identifier {extent_id} in store {store_id}")]
    ExtentNotOpen {
        /// Store id.
        store_id: String,
        /// Extent id.
        extent_id: u64,
    },

    /// Stores in one directory disagree on implementation or storage version.
    #[error(
        "Implementation and storage versions are inconsistent across stores in directory: {} (store {guid})",
        path.display()
    )]
    MetadataInconsistent {
        /// The snapshot or data directory.
        path: PathBuf,
        /// First store whose metadata disagreed.
        guid: String,
    },

    /// A store's metadata is missing, incomplete or incompatible.
    #[error("invalid metadata in {}: {message}", path.display())]
    InvalidMetadata {
        /// Store directory.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// The target of a create already exists.
    #[error("already exists: {}", path.display())]
    AlreadyExists {
        /// The existing path.
        path: PathBuf,
    },

    /// A transaction token was used with a store that did not issue it.
    #[error("transaction token was not issued by store {store_id}")]
    InvalidToken {
        /// Store the token was presented to.
        store_id: String,
    },

    /// An argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The store is not open.
    #[error("store {store_id} is not open")]
    StoreClosed {
        /// Store id.
        store_id: String,
    },

    /// The store is already open and the operation needs it closed.
    #[error("store {store_id} is currently open")]
    StoreOpen {
        /// Store id.
        store_id: String,
    },

    /// The manager or environment has been released.
    #[error("{what} has been released")]
    Released {
        /// What was released ("manager" or "environment").
        what: &'static str,
    },

    /// A store was expected to be sealed.
    #[error("store {store_id} is not sealed")]
    StoreNotSealed {
        /// Store id.
        store_id: String,
    },

    /// A visitor aborted iteration with an error.
    #[error("visitor failed while iterating store {store_id}: {source}")]
    Visitor {
        /// Store id.
        store_id: String,
        /// The visitor's error.
        #[source]
        source: Box<PersistenceError>,
    },

    /// A snapshot could not be created.
    #[error("snapshot {snapshot} failed at store directory {}: {source}", store_dir.display())]
    Snapshot {
        /// Snapshot name or directory.
        snapshot: String,
        /// Store directory being copied when it failed.
        store_dir: PathBuf,
        /// Underlying failure.
        #[source]
        source: Box<PersistenceError>,
    },

    /// A store stream is malformed.
    #[error("corrupt store stream: {message}")]
    Stream {
        /// Description of the problem.
        message: String,
    },
}

impl PersistenceError {
    /// Wraps an engine error with context.
    pub fn engine(context: impl Into<String>, source: EngineError) -> Self {
        Self::Engine {
            context: context.into(),
            source,
        }
    }

    /// Wraps an I/O error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid metadata error.
    pub fn invalid_metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a stream corruption error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a [`PersistenceError::StorageOpen`].
    #[must_use]
    pub fn is_storage_open(&self) -> bool {
        matches!(self, Self::StorageOpen { .. })
    }
}
