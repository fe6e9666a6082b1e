//! The journal device trait.

use crate::error::DeviceResult;
use std::path::Path;

/// How far a [`JournalDevice::sync`] call pushes pending writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Hand buffered bytes to the operating system.
    Flush,
    /// Make file contents durable (`fdatasync`).
    #[default]
    Data,
    /// Make contents and file metadata durable (`fsync`).
    All,
}

/// Byte storage for a single append-only journal.
///
/// # Invariants
///
/// - `append` returns the offset at which the bytes landed, which is
///   always the size before the call
/// - `read_at` returns exactly the bytes previously written there
/// - `replace` is atomic: after a crash the device holds either the old
///   or the new contents, never a mix
/// - Devices must be `Send + Sync` so an engine can be shared across threads
pub trait JournalDevice: Send + Sync + std::fmt::Debug {
    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> DeviceResult<u64>;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeviceError::ReadPastEnd`] if the range extends past
    /// the end, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> DeviceResult<Vec<u8>>;

    /// Reads the whole journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read_all(&self) -> DeviceResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, "journal exceeds address space")
        })?;
        self.read_at(0, len)
    }

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> DeviceResult<u64>;

    /// Pushes pending writes down to the level given by `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    fn sync(&mut self, mode: SyncMode) -> DeviceResult<()>;

    /// Cuts the journal down to `new_size` bytes.
    ///
    /// Used by recovery to drop a torn tail so later appends start on a
    /// frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeviceError::TruncateBeyondEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> DeviceResult<()>;

    /// Atomically swaps the whole journal for `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be made durable. The
    /// old contents are left in place in that case.
    fn replace(&mut self, contents: &[u8]) -> DeviceResult<()>;

    /// Writes a durable copy of the current contents to `dest`.
    ///
    /// Returns the number of bytes copied. `dest` must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` exists or the copy fails.
    fn copy_to(&self, dest: &Path) -> DeviceResult<u64>;
}
