//! Error types for the journal engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the journal engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Journal device error.
    #[error("device error: {0}")]
    Device(#[from] stowage_storage::DeviceError),

    /// I/O error outside the journal device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another engine instance holds the directory lock.
    #[error("engine directory is locked by another instance: {}", path.display())]
    Locked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The engine directory does not exist and creation was not requested.
    #[error("engine directory does not exist: {}", path.display())]
    MissingDirectory {
        /// The missing directory.
        path: PathBuf,
    },

    /// A namespace with this name already exists.
    #[error("namespace already exists: {name}")]
    NamespaceExists {
        /// Namespace name.
        name: String,
    },

    /// No namespace with this name exists.
    #[error("no such namespace: {name}")]
    NoSuchNamespace {
        /// Namespace name.
        name: String,
    },

    /// The operation is not allowed on the reserved default namespace.
    #[error("namespace {name:?} is reserved")]
    ReservedNamespace {
        /// Namespace name.
        name: String,
    },

    /// A handle refers to a namespace that was dropped after it was issued.
    #[error("namespace handle is stale: {name}")]
    StaleHandle {
        /// Namespace name the handle was issued for.
        name: String,
    },

    /// A handle or transaction was issued by a different engine instance.
    #[error("{what} belongs to another engine instance")]
    ForeignObject {
        /// What was passed in ("transaction" or "namespace handle").
        what: &'static str,
    },

    /// The journal is structurally corrupt.
    #[error("journal corruption at offset {offset}: {message}")]
    Corruption {
        /// Offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: stored {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// A write was attempted on a read-only engine.
    #[error("engine is open read-only")]
    ReadOnly,

    /// An argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl EngineError {
    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns `true` for [`EngineError::NamespaceExists`].
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::NamespaceExists { .. })
    }

    /// Returns `true` for [`EngineError::NoSuchNamespace`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchNamespace { .. })
    }
}
