//! Engine directory layout and the cross-process lock.
//!
//! ```text
//! <engine dir>/
//! ├─ LOCK          # fs2 advisory lock, exclusive for writers, shared for readers
//! └─ journal.log   # CRC-framed journal
//! ```

use crate::error::{EngineError, EngineResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Name of the lock file in an engine directory.
pub const LOCK_FILE: &str = "LOCK";

/// Name of the journal file in an engine directory.
pub const JOURNAL_FILE: &str = "journal.log";

/// Holds the advisory lock on an engine directory for as long as it lives.
#[derive(Debug)]
pub(crate) struct DirLock {
    path: PathBuf,
    _file: Option<File>,
}

impl DirLock {
    /// Locks `path`, creating the directory if `create` is set.
    ///
    /// Writers take the lock exclusively, creating the lock file. Read-only
    /// engines share the lock through an existing file and never write to
    /// the directory; with no lock file present they hold no lock.
    pub(crate) fn acquire(path: &Path, create: bool, shared: bool) -> EngineResult<Self> {
        if !path.exists() {
            if create {
                fs::create_dir_all(path)?;
            } else {
                return Err(EngineError::MissingDirectory {
                    path: path.to_path_buf(),
                });
            }
        }
        if !path.is_dir() {
            return Err(EngineError::invalid_argument(format!(
                "engine path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let file = if shared {
            match File::open(&lock_path) {
                Ok(file) => Some(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&lock_path)?,
            )
        };
        if let Some(file) = &file {
            let locked = if shared {
                FileExt::try_lock_shared(file)
            } else {
                FileExt::try_lock_exclusive(file)
            };
            if locked.is_err() {
                return Err(EngineError::Locked {
                    path: path.to_path_buf(),
                });
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
