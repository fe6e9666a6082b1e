//! Journal device backed by a single file.

use crate::device::{JournalDevice, SyncMode};
use crate::error::{DeviceError, DeviceResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in one file.
///
/// # Durability
///
/// - `sync(SyncMode::Data)` calls `File::sync_data`
/// - `sync(SyncMode::All)` calls `File::sync_all`
/// - `replace` writes a sibling temp file, syncs it, renames it over the
///   journal and then syncs the parent directory
///
/// # Example
///
/// ```no_run
/// use stowage_storage::{FileDevice, JournalDevice, SyncMode};
/// use std::path::Path;
///
/// let mut device = FileDevice::open(Path::new("journal.log")).unwrap();
/// device.append(b"frame").unwrap();
/// device.sync(SyncMode::Data).unwrap();
/// ```
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    state: Mutex<OpenFile>,
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
}

impl FileDevice {
    /// Opens the journal at `path`, creating an empty one if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> DeviceResult<Self> {
        let file = open_rw(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(OpenFile { file, size }),
        })
    }

    /// Returns the journal's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// Syncs the directory holding `path` so a rename into it is durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl JournalDevice for FileDevice {
    fn size(&self) -> DeviceResult<u64> {
        Ok(self.state.lock().size)
    }

    fn read_at(&self, offset: u64, len: usize) -> DeviceResult<Vec<u8>> {
        let mut state = self.state.lock();
        let size = state.size;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(DeviceError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        state.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> DeviceResult<u64> {
        let state = self.state.get_mut();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self, mode: SyncMode) -> DeviceResult<()> {
        let state = self.state.get_mut();
        match mode {
            SyncMode::Flush => state.file.flush()?,
            SyncMode::Data => state.file.sync_data()?,
            SyncMode::All => state.file.sync_all()?,
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> DeviceResult<()> {
        let state = self.state.get_mut();
        if new_size > state.size {
            return Err(DeviceError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }

        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> DeviceResult<()> {
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }

        if let Err(err) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        sync_parent(&self.path)?;

        let file = open_rw(&self.path)?;
        let state = self.state.get_mut();
        state.file = file;
        state.size = contents.len() as u64;
        Ok(())
    }

    fn copy_to(&self, dest: &Path) -> DeviceResult<u64> {
        let mut state = self.state.lock();
        state.file.flush()?;
        let size = state.size;

        let mut out = OpenOptions::new().write(true).create_new(true).open(dest)?;
        state.file.seek(SeekFrom::Start(0))?;
        let copied = io::copy(&mut (&state.file).take(size), &mut out)?;
        out.sync_all()?;
        Ok(copied)
    }
}
