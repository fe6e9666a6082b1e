//! Store metadata (`meta.properties`).
//!
//! Every store directory carries a small properties file naming the
//! implementation version, storage format and storage version that wrote
//! it. It is written each time a store is opened for writing, copied
//! verbatim into snapshots, and checked before an existing store is
//! reopened.
//!
//! ```text
//! implementation.version=0
//! storage.format=journal
//! storage.version=1
//! ```

use crate::error::{PersistenceError, PersistenceResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// File name of the metadata file inside a store directory.
pub const META_FILENAME: &str = "meta.properties";

/// Key of the implementation version.
pub const META_IMPL_VERSION: &str = "implementation.version";

/// Key of the storage format tag.
pub const META_STORAGE_FORMAT: &str = "storage.format";

/// Key of the storage version.
pub const META_STORAGE_VERSION: &str = "storage.version";

const META_TEMP: &str = "meta.properties.tmp";

/// Parsed contents of a `meta.properties` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetadata {
    properties: BTreeMap<String, String>,
}

impl StoreMetadata {
    /// Metadata describing a store written by the given engine.
    #[must_use]
    pub fn new(impl_version: u32, storage_format: &str, storage_version: u32) -> Self {
        let mut meta = Self::default();
        meta.set(META_IMPL_VERSION, impl_version.to_string());
        meta.set(META_STORAGE_FORMAT, storage_format);
        meta.set(META_STORAGE_VERSION, storage_version.to_string());
        meta
    }

    /// Returns a property, trimmed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.trim())
    }

    /// Sets a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Implementation version, if present and numeric.
    #[must_use]
    pub fn impl_version(&self) -> Option<u32> {
        self.get(META_IMPL_VERSION)?.parse().ok()
    }

    /// Storage format tag, if present and non-empty.
    #[must_use]
    pub fn storage_format(&self) -> Option<&str> {
        self.get(META_STORAGE_FORMAT).filter(|f| !f.is_empty())
    }

    /// Storage version, if present and numeric.
    #[must_use]
    pub fn storage_version(&self) -> Option<u32> {
        self.get(META_STORAGE_VERSION)?.parse().ok()
    }

    /// Returns `true` if all three version properties are non-blank.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [META_IMPL_VERSION, META_STORAGE_FORMAT, META_STORAGE_VERSION]
            .iter()
            .all(|key| self.get(key).is_some_and(|v| !v.is_empty()))
    }

    /// Returns `true` if a store with this metadata can be opened by an
    /// engine with the given versions.
    ///
    /// The implementation version may be older than the engine's; format
    /// and storage version must match exactly. Unparseable versions never
    /// match.
    #[must_use]
    pub fn is_compatible(&self, impl_version: u32, storage_format: &str, storage_version: u32) -> bool {
        self.impl_version().is_some_and(|v| v <= impl_version)
            && self.storage_version() == Some(storage_version)
            && self.storage_format() == Some(storage_format)
    }

    /// Parses properties text.
    ///
    /// Supports `key=value` and `key:value` lines; `#` and `!` start
    /// comment lines. Keys and values are trimmed.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut meta = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            match line.find(['=', ':']) {
                Some(at) => meta.set(line[..at].trim(), line[at + 1..].trim()),
                None => meta.set(line, ""),
            }
        }
        meta
    }

    /// Renders properties text.
    #[must_use]
    pub fn to_properties(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.properties {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }

    /// Reads the metadata of store directory `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the file is missing or unreadable.
    pub fn read(dir: &Path) -> PersistenceResult<Self> {
        let path = dir.join(META_FILENAME);
        let text = fs::read_to_string(&path).map_err(|e| {
            PersistenceError::io(format!("error reading metadata {}", path.display()), e)
        })?;
        Ok(Self::parse(&text))
    }

    /// Like [`StoreMetadata::read`] but returns `None` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_if_present(dir: &Path) -> PersistenceResult<Option<Self>> {
        match fs::read_to_string(dir.join(META_FILENAME)) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(
                format!("error reading metadata in {}", dir.display()),
                e,
            )),
        }
    }

    /// Writes the metadata into store directory `dir`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidArgument`] if the metadata is
    /// incomplete, or an I/O error.
    pub fn write(&self, dir: &Path) -> PersistenceResult<()> {
        if !self.is_complete() {
            return Err(PersistenceError::invalid_argument("incomplete metadata"));
        }

        let temp = dir.join(META_TEMP);
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(self.to_properties().as_bytes())?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp, dir.join(META_FILENAME))?;
            sync_dir(dir)
        })();

        result.map_err(|e| {
            let _ = fs::remove_file(&temp);
            PersistenceError::io(format!("error writing metadata in {}", dir.display()), e)
        })
    }

    /// Copies the metadata file from one store directory to another.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or the copy fails.
    pub fn copy(from_dir: &Path, to_dir: &Path) -> PersistenceResult<()> {
        fs::copy(from_dir.join(META_FILENAME), to_dir.join(META_FILENAME))
            .map(|_| ())
            .map_err(|e| {
                PersistenceError::io(
                    format!(
                        "error copying metadata from {} to {}",
                        from_dir.display(),
                        to_dir.display()
                    ),
                    e,
                )
            })
    }
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
