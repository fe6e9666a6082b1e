//! Heap-backed journal device.

use crate::device::{JournalDevice, SyncMode};
use crate::error::{DeviceError, DeviceResult};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// A journal held in memory.
///
/// Used by ephemeral engines and by tests that need to poke at raw journal
/// bytes. [`MemoryDevice::share`] hands out a second device over the same
/// buffer, so a test can keep a handle after giving the device to an engine.
///
/// # Example
///
/// ```rust
/// use stowage_storage::{JournalDevice, MemoryDevice};
///
/// let mut device = MemoryDevice::new();
/// let observer = device.share();
/// device.append(b"abc").unwrap();
/// assert_eq!(observer.contents(), b"abc");
/// ```
#[derive(Debug, Default)]
pub struct MemoryDevice {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device preloaded with `data`, e.g. a journal image.
    #[must_use]
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a device sharing this device's buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Returns a copy of the buffer.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites the byte at `offset`, for corruption tests.
    ///
    /// Out-of-range offsets are ignored.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte = value;
        }
    }
}

impl JournalDevice for MemoryDevice {
    fn size(&self) -> DeviceResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn read_at(&self, offset: u64, len: usize) -> DeviceResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(DeviceError::ReadPastEnd { offset, len, size });
        }
        // end <= size, so both bounds fit in usize
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> DeviceResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self, _mode: SyncMode) -> DeviceResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> DeviceResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(DeviceError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> DeviceResult<()> {
        *self.data.write() = contents.to_vec();
        Ok(())
    }

    fn copy_to(&self, dest: &Path) -> DeviceResult<u64> {
        let data = self.data.read();
        let mut out = OpenOptions::new().write(true).create_new(true).open(dest)?;
        out.write_all(&data)?;
        out.sync_all()?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn shared_handle_sees_appends() {
        let mut device = MemoryDevice::new();
        let observer = device.share();

        device.append(b"one").unwrap();
        device.append(b"two").unwrap();
        assert_eq!(observer.contents(), b"onetwo");
        assert_eq!(observer.size().unwrap(), 6);
    }

    #[test]
    fn corrupt_byte_is_visible_to_reads() {
        let mut device = MemoryDevice::new();
        device.append(b"abc").unwrap();

        device.corrupt_byte(1, b'X');
        device.corrupt_byte(99, b'X');
        assert_eq!(device.read_all().unwrap(), b"aXc");
    }

    #[test]
    fn truncate_and_replace() {
        let mut device = MemoryDevice::with_contents(b"abcdef".to_vec());

        device.truncate(3).unwrap();
        assert_eq!(device.contents(), b"abc");
        assert!(device.truncate(4).is_err());

        device.replace(b"xy").unwrap();
        assert_eq!(device.append(b"z").unwrap(), 2);
        assert_eq!(device.contents(), b"xyz");
    }

    #[test]
    fn copy_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let device = MemoryDevice::with_contents(b"image".to_vec());
        let dest = dir.path().join("journal.log");

        assert_eq!(device.copy_to(&dest).unwrap(), 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"image");
    }

    proptest! {
        #[test]
        fn reads_match_appended_chunks(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut device = MemoryDevice::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(device.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&device.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
