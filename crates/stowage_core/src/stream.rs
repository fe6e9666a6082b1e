//! Portable store stream format.
//!
//! A stream carries the full contents of one store independently of the
//! engine that wrote it. All integers are big-endian.
//!
//! ```text
//! magic:u32 = 0x6A683735 | version:u8 = 0
//! { key_len:i32 | value_len:i32 | extent_id:u64 | key | value }*
//! -1:i32
//! ```
//!
//! Empty extents are not represented; extents are created on import as
//! entries arrive.

use crate::config::{Heartbeat, HEARTBEAT_INTERVAL};
use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{PersistentStore, Visitor};
use std::collections::BTreeSet;
use std::io::{self, Read, Write};

/// Leading magic number of a store stream.
pub const STREAM_MAGIC: u32 = 0x6A68_3735;

/// Stream format version written by this crate.
pub const STREAM_VERSION: u8 = 0;

const END_OF_STREAM: i32 = -1;

/// Counts from one stream transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Entries written or read.
    pub entries: u64,
    /// Sum of key and value lengths.
    pub bytes: u64,
}

fn write_error(e: io::Error) -> PersistenceError {
    PersistenceError::io("error writing store stream", e)
}

fn length(len: usize, what: &str) -> PersistenceResult<[u8; 4]> {
    i32::try_from(len)
        .map(i32::to_be_bytes)
        .map_err(|_| PersistenceError::stream(format!("{what} of {len} bytes is too large")))
}

struct StreamWriter<'a> {
    out: &'a mut dyn Write,
    heartbeat: Option<&'a Heartbeat>,
    stats: StreamStats,
    failure: Option<PersistenceError>,
}

impl StreamWriter<'_> {
    fn entry(&mut self, extent_id: u64, key: &[u8], value: &[u8]) -> PersistenceResult<()> {
        let mut header = [0u8; 16];
        header[..4].copy_from_slice(&length(key.len(), "key")?);
        header[4..8].copy_from_slice(&length(value.len(), "value")?);
        header[8..].copy_from_slice(&extent_id.to_be_bytes());
        self.out.write_all(&header).map_err(write_error)?;
        self.out.write_all(key).map_err(write_error)?;
        self.out.write_all(value).map_err(write_error)?;

        self.stats.entries += 1;
        self.stats.bytes += (key.len() + value.len()) as u64;
        if let Some(heartbeat) = self.heartbeat {
            if self.stats.entries % HEARTBEAT_INTERVAL == 0 {
                heartbeat.beat();
            }
        }
        Ok(())
    }
}

impl Visitor for StreamWriter<'_> {
    fn visit(&mut self, extent_id: u64, key: &[u8], value: &[u8]) -> PersistenceResult<bool> {
        match self.entry(extent_id, key, value) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.failure = Some(e);
                Ok(false)
            }
        }
    }
}

/// Writes the contents of an open store to `out`.
///
/// # Errors
///
/// Returns an error if iteration or writing fails.
pub fn write_store(
    store: &dyn PersistentStore,
    out: &mut dyn Write,
    heartbeat: Option<&Heartbeat>,
) -> PersistenceResult<StreamStats> {
    out.write_all(&STREAM_MAGIC.to_be_bytes()).map_err(write_error)?;
    out.write_all(&[STREAM_VERSION]).map_err(write_error)?;

    let mut writer = StreamWriter {
        out,
        heartbeat,
        stats: StreamStats::default(),
        failure: None,
    };
    store.iterate(&mut writer)?;
    if let Some(failure) = writer.failure {
        return Err(failure);
    }
    let stats = writer.stats;

    writer
        .out
        .write_all(&END_OF_STREAM.to_be_bytes())
        .map_err(write_error)?;
    writer.out.flush().map_err(write_error)?;
    Ok(stats)
}

fn read_exact(input: &mut dyn Read, buf: &mut [u8], what: &str) -> PersistenceResult<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PersistenceError::stream(format!(
                "expected {} bytes for {what} but reached end of stream",
                buf.len()
            ))
        } else {
            PersistenceError::io("error reading store stream", e)
        }
    })
}

/// Reads a field of `len` bytes without trusting `len` for the allocation.
fn read_field(input: &mut dyn Read, len: usize, what: &str) -> PersistenceResult<Vec<u8>> {
    let mut buf = Vec::new();
    Read::take(&mut *input, len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| PersistenceError::io("error reading store stream", e))?;
    if buf.len() != len {
        return Err(PersistenceError::stream(format!(
            "expected {len} bytes for {what} but reached end of stream"
        )));
    }
    Ok(buf)
}

fn read_i32(input: &mut dyn Read, what: &str) -> PersistenceResult<i32> {
    let mut buf = [0u8; 4];
    read_exact(input, &mut buf, what)?;
    Ok(i32::from_be_bytes(buf))
}

/// Reads a stream from `input` into an open, empty store.
///
/// Entries are stored one at a time; the caller discards the store if
/// this fails part way.
///
/// # Errors
///
/// Returns [`PersistenceError::Stream`] if the stream is unrecognized,
/// newer than [`STREAM_VERSION`] or truncated.
pub fn read_store(store: &dyn PersistentStore, input: &mut dyn Read) -> PersistenceResult<StreamStats> {
    let mut magic = [0u8; 4];
    read_exact(input, &mut magic, "magic")?;
    if u32::from_be_bytes(magic) != STREAM_MAGIC {
        return Err(PersistenceError::stream("the data stream is unrecognized"));
    }

    let mut version = [0u8; 1];
    read_exact(input, &mut version, "version")?;
    if version[0] > STREAM_VERSION {
        return Err(PersistenceError::stream(format!(
            "the data stream is a newer version ({}) than is supported ({STREAM_VERSION})",
            version[0]
        )));
    }

    let mut stats = StreamStats::default();
    let mut extents = BTreeSet::new();
    loop {
        let key_len = read_i32(input, "key length")?;
        if key_len < 0 {
            break;
        }
        let value_len = read_i32(input, "value length")?;
        if value_len < 0 {
            return Err(PersistenceError::stream(format!(
                "negative value length {value_len}"
            )));
        }
        let mut extent = [0u8; 8];
        read_exact(input, &mut extent, "extent identifier")?;
        let extent_id = u64::from_be_bytes(extent);

        #[allow(clippy::cast_sign_loss)]
        let (key_len, value_len) = (key_len as usize, value_len as usize);
        let key = read_field(input, key_len, "key")?;
        let value = read_field(input, value_len, "value")?;

        if extents.insert(extent_id) {
            store.create_extent(extent_id)?;
        }
        store.store(extent_id, &key, &value, None)?;
        stats.entries += 1;
        stats.bytes += (key_len + value_len) as u64;
    }
    Ok(stats)
}
