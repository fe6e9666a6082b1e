//! Error types for journal devices.

use std::io;
use thiserror::Error;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors raised by a [`crate::JournalDevice`].
#[derive(Debug, Error)]
pub enum DeviceError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the end of the journal.
    #[error("read beyond end of journal: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current journal size.
        size: u64,
    },

    /// A truncation asked to grow the journal.
    #[error("cannot truncate journal of {size} bytes to {requested} bytes")]
    TruncateBeyondEnd {
        /// The requested new length.
        requested: u64,
        /// The current journal size.
        size: u64,
    },
}
