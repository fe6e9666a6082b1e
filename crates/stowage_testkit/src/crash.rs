//! Crash simulation for journal recovery tests.
//!
//! A crash is simulated by editing a released store's journal file the way
//! an interrupted write would leave it, then reopening the store.
//!
//! ## Crash points
//!
//! 1. **Torn frame** - a frame cut short at the end of the journal
//! 2. **Before commit** - a complete `Begin .. Put` group with no `Commit`
//! 3. **Bit rot** - a flipped byte inside an intact frame
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stowage_testkit::crash::{simulate_crash, CrashPoint};
//!
//! manager.release();
//! simulate_crash(&store_dir, CrashPoint::TornFrame)?;
//! ```

use bytes::Bytes;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use stowage_engine::{JournalRecord, TransactionId, JOURNAL_FILE};

/// Transaction id used for frames written by this module. High enough not
/// to collide with ids a test store hands out.
pub const CRASH_TXID: u64 = 1_000_000;

/// Key written by the uncommitted transaction of [`CrashPoint::BeforeCommit`].
pub const UNCOMMITTED_KEY: &[u8] = b"uncommitted";

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// A `Put` frame cut in half at the end of the journal.
    TornFrame,
    /// A transaction for extent `extent` whose commit frame never arrived.
    BeforeCommit {
        /// Extent written by the lost transaction.
        extent: u64,
    },
    /// One byte of the frame at `offset` flipped.
    BitRot {
        /// Byte offset into the journal.
        offset: u64,
    },
}

/// Journal file of the store in `store_dir`.
pub fn journal_path(store_dir: &Path) -> PathBuf {
    store_dir.join(JOURNAL_FILE)
}

/// Current journal size of the store in `store_dir`.
pub fn journal_len(store_dir: &Path) -> io::Result<u64> {
    Ok(fs::metadata(journal_path(store_dir))?.len())
}

fn frame(record: &JournalRecord) -> io::Result<Vec<u8>> {
    record
        .encode_frame()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

fn append(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Leaves the journal of the (released) store in `store_dir` as the given
/// crash would.
pub fn simulate_crash(store_dir: &Path, point: CrashPoint) -> io::Result<()> {
    let path = journal_path(store_dir);
    let txid = TransactionId::new(CRASH_TXID);
    match point {
        CrashPoint::TornFrame => {
            let put = frame(&JournalRecord::Put {
                txid,
                namespace: "1".to_string(),
                key: Bytes::from_static(b"torn"),
                value: Bytes::from_static(b"never written"),
            })?;
            append(&path, &put[..put.len() / 2])
        }
        CrashPoint::BeforeCommit { extent } => {
            let mut bytes = frame(&JournalRecord::Begin { txid })?;
            bytes.extend(frame(&JournalRecord::Put {
                txid,
                namespace: extent.to_string(),
                key: Bytes::from_static(UNCOMMITTED_KEY),
                value: Bytes::from_static(b"lost"),
            })?);
            append(&path, &bytes)
        }
        CrashPoint::BitRot { offset } => {
            let mut bytes = fs::read(&path)?;
            let index = usize::try_from(offset)
                .ok()
                .filter(|i| *i < bytes.len())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "offset past end of journal")
                })?;
            bytes[index] ^= 0xFF;
            fs::write(&path, bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_engine::verify_journal;
    use tempfile::tempdir;

    #[test]
    fn torn_frame_is_reported_as_tail() {
        let dir = tempdir().unwrap();
        fs::write(journal_path(dir.path()), b"").unwrap();
        simulate_crash(dir.path(), CrashPoint::TornFrame).unwrap();

        let report = verify_journal(&journal_path(dir.path())).unwrap();
        assert_eq!(report.frames, 0);
        assert_eq!(report.torn_bytes, journal_len(dir.path()).unwrap());
    }

    #[test]
    fn before_commit_leaves_incomplete_transaction() {
        let dir = tempdir().unwrap();
        fs::write(journal_path(dir.path()), b"").unwrap();
        simulate_crash(dir.path(), CrashPoint::BeforeCommit { extent: 1 }).unwrap();

        let report = verify_journal(&journal_path(dir.path())).unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.incomplete_transactions, 1);
    }

    #[test]
    fn bit_rot_past_end_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(journal_path(dir.path()), b"abc").unwrap();
        assert!(simulate_crash(dir.path(), CrashPoint::BitRot { offset: 3 }).is_err());
    }
}
