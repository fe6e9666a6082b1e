//! The append-only journal.
//!
//! ## Recovery policy
//!
//! - A frame that is cut short (incomplete header or body) at the end of
//!   the journal is a torn write. Reading stops there and, unless the
//!   engine is read-only, the tail is truncated so the next append starts
//!   on a frame boundary.
//! - A complete frame with a bad magic, unknown type or checksum mismatch
//!   is corruption and refuses the open.
//! - Transactions are only applied once their `Commit` frame is read.

use crate::error::{EngineError, EngineResult};
use crate::record::{
    compute_crc32, JournalRecord, RecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
use std::collections::HashSet;
use std::path::Path;
use stowage_storage::{JournalDevice, SyncMode};

/// A streaming reader over an in-memory journal image.
///
/// Yields `(offset, record)` pairs. Iteration ends at the first torn
/// frame; [`JournalReader::valid_len`] then reports where the intact
/// prefix ends.
pub struct JournalReader<'a> {
    data: &'a [u8],
    pos: usize,
    finished: bool,
}

impl<'a> JournalReader<'a> {
    /// Creates a reader starting at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            finished: false,
        }
    }

    /// Length of the intact prefix read so far.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.pos as u64
    }

    fn read_next(&mut self) -> EngineResult<Option<(u64, JournalRecord)>> {
        let offset = self.pos as u64;
        let rest = &self.data[self.pos..];
        if rest.len() < HEADER_SIZE {
            return Ok(None);
        }

        if rest[0..4] != JOURNAL_MAGIC {
            return Err(EngineError::corruption(offset, "invalid frame magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > JOURNAL_VERSION {
            return Err(EngineError::corruption(
                offset,
                format!("unsupported journal version {version}"),
            ));
        }
        let record_type = RecordType::from_byte(rest[6]).ok_or_else(|| {
            EngineError::corruption(offset, format!("unknown record type {}", rest[6]))
        })?;
        let payload_len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

        let body_end = HEADER_SIZE.saturating_add(payload_len);
        let frame_len = body_end.saturating_add(CRC_SIZE);
        if rest.len() < frame_len {
            return Ok(None);
        }

        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = compute_crc32(&rest[..body_end]);
        if stored != computed {
            return Err(EngineError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let record = JournalRecord::decode_payload(record_type, &rest[HEADER_SIZE..body_end], offset)?;
        self.pos += frame_len;
        Ok(Some((offset, record)))
    }
}

impl Iterator for JournalReader<'_> {
    type Item = EngineResult<(u64, JournalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// The intact records of a journal, as read at open.
#[derive(Debug, Default)]
pub struct RecoveredJournal {
    /// Every intact record with its offset, in journal order.
    pub records: Vec<(u64, JournalRecord)>,
    /// Bytes discarded as a torn tail.
    pub torn_bytes: u64,
}

/// Summary of an offline journal check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalReport {
    /// Total journal size in bytes.
    pub size: u64,
    /// Number of intact frames.
    pub frames: u64,
    /// Transactions with a commit frame.
    pub committed_transactions: u64,
    /// Transactions begun but never committed.
    pub incomplete_transactions: u64,
    /// Bytes of torn tail after the last intact frame.
    pub torn_bytes: u64,
}

/// Framed access to a journal device.
#[derive(Debug)]
pub struct Journal {
    device: Box<dyn JournalDevice>,
    sync_on_commit: bool,
}

impl Journal {
    /// Wraps `device`.
    pub fn new(device: Box<dyn JournalDevice>, sync_on_commit: bool) -> Self {
        Self {
            device,
            sync_on_commit,
        }
    }

    /// Reads all intact records.
    ///
    /// When `repair` is set a torn tail is truncated away.
    ///
    /// # Errors
    ///
    /// Returns an error on corruption or I/O failure.
    pub fn recover(&mut self, repair: bool) -> EngineResult<RecoveredJournal> {
        let data = self.device.read_all()?;
        let mut reader = JournalReader::new(&data);
        let mut records = Vec::new();
        for item in reader.by_ref() {
            records.push(item?);
        }

        let valid_len = reader.valid_len();
        let torn_bytes = data.len() as u64 - valid_len;
        if torn_bytes > 0 {
            tracing::warn!(torn_bytes, valid_len, "discarding torn journal tail");
            if repair {
                self.device.truncate(valid_len)?;
            }
        }
        Ok(RecoveredJournal {
            records,
            torn_bytes,
        })
    }

    /// Appends `records` as one contiguous write.
    ///
    /// The write is synced when the journal was created with
    /// `sync_on_commit`. Returns the offset of the first frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the device write fails.
    pub fn append(&mut self, records: &[JournalRecord]) -> EngineResult<u64> {
        let mut batch = Vec::new();
        for record in records {
            batch.extend_from_slice(&record.encode_frame()?);
        }
        let offset = self.device.append(&batch)?;
        let mode = if self.sync_on_commit {
            SyncMode::Data
        } else {
            SyncMode::Flush
        };
        self.device.sync(mode)?;
        Ok(offset)
    }

    /// Atomically replaces the journal with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the replacement fails.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> EngineResult<u64> {
        let mut image = Vec::new();
        for record in records {
            image.extend_from_slice(&record.encode_frame()?);
        }
        self.device.replace(&image)?;
        Ok(image.len() as u64)
    }

    /// Current journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot report its size.
    pub fn size(&self) -> EngineResult<u64> {
        Ok(self.device.size()?)
    }

    /// Fully syncs the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync_all(&mut self) -> EngineResult<()> {
        Ok(self.device.sync(SyncMode::All)?)
    }

    /// Copies the journal to a new file at `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` exists or the copy fails.
    pub fn copy_to(&self, dest: &Path) -> EngineResult<u64> {
        Ok(self.device.copy_to(dest)?)
    }
}

/// Checks a journal file without opening an engine over it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds a corrupt frame.
pub fn verify_journal(path: &Path) -> EngineResult<JournalReport> {
    let data = std::fs::read(path)?;
    let mut reader = JournalReader::new(&data);
    let mut report = JournalReport {
        size: data.len() as u64,
        ..JournalReport::default()
    };
    let mut open = HashSet::new();

    for item in reader.by_ref() {
        let (_, record) = item?;
        report.frames += 1;
        match record {
            JournalRecord::Begin { txid } => {
                open.insert(txid);
            }
            JournalRecord::Commit { txid } => {
                if open.remove(&txid) {
                    report.committed_transactions += 1;
                }
            }
            _ => {}
        }
    }

    report.incomplete_transactions = open.len() as u64;
    report.torn_bytes = report.size - reader.valid_len();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionId;
    use bytes::Bytes;
    use stowage_storage::MemoryDevice;

    fn txn(id: u64, key: &str) -> Vec<JournalRecord> {
        let txid = TransactionId::new(id);
        vec![
            JournalRecord::Begin { txid },
            JournalRecord::Put {
                txid,
                namespace: "1".into(),
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::from_static(b"v"),
            },
            JournalRecord::Commit { txid },
        ]
    }

    #[test]
    fn append_then_recover() {
        let device = MemoryDevice::new();
        let mut journal = Journal::new(Box::new(device.share()), true);
        journal.append(&txn(1, "a")).unwrap();
        journal.append(&txn(2, "b")).unwrap();

        let mut reopened = Journal::new(Box::new(device), true);
        let recovered = reopened.recover(true).unwrap();
        assert_eq!(recovered.records.len(), 6);
        assert_eq!(recovered.torn_bytes, 0);
    }

    #[test]
    fn torn_tail_is_truncated_on_repair() {
        let device = MemoryDevice::new();
        let mut journal = Journal::new(Box::new(device.share()), false);
        journal.append(&txn(1, "a")).unwrap();
        let intact = journal.size().unwrap();
        journal.append(&txn(2, "b")).unwrap();

        let mut image = device.contents();
        image.truncate(image.len() - 3);
        let torn_len = image.len() as u64;
        let torn = MemoryDevice::with_contents(image);

        let mut reopened = Journal::new(Box::new(torn.share()), false);
        let recovered = reopened.recover(true).unwrap();
        // the second transaction's begin and put survive, its commit is torn
        assert_eq!(recovered.records.len(), 5);
        assert!(recovered.torn_bytes > 0);
        assert!(torn.size().unwrap() > intact);
        assert_eq!(torn.size().unwrap(), torn_len - recovered.torn_bytes);
    }

    #[test]
    fn read_only_recovery_leaves_tail_alone() {
        let mut image = Vec::new();
        for record in txn(1, "a") {
            image.extend(record.encode_frame().unwrap());
        }
        image.extend_from_slice(b"SJ");
        let device = MemoryDevice::with_contents(image.clone());

        let mut journal = Journal::new(Box::new(device.share()), false);
        let recovered = journal.recover(false).unwrap();
        assert_eq!(recovered.torn_bytes, 2);
        assert_eq!(device.contents(), image);
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let device = MemoryDevice::new();
        let mut journal = Journal::new(Box::new(device.share()), false);
        journal.append(&txn(1, "a")).unwrap();
        device.corrupt_byte(HEADER_SIZE + 2, 0xAA);

        let err = journal.recover(true).unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let device = MemoryDevice::with_contents(vec![0u8; 32]);
        let mut journal = Journal::new(Box::new(device), false);
        assert!(matches!(
            journal.recover(true).unwrap_err(),
            EngineError::Corruption { offset: 0, .. }
        ));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let device = MemoryDevice::new();
        let mut journal = Journal::new(Box::new(device.share()), false);
        journal.append(&txn(1, "a")).unwrap();
        journal.append(&txn(2, "b")).unwrap();

        let size = journal.rewrite(&txn(3, "c")).unwrap();
        assert_eq!(journal.size().unwrap(), size);
        let recovered = journal.recover(false).unwrap();
        let records: Vec<_> = recovered.records.into_iter().map(|(_, r)| r).collect();
        assert_eq!(records, txn(3, "c"));
    }

    #[test]
    fn verify_counts_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");
        let mut image = Vec::new();
        for record in txn(1, "a") {
            image.extend(record.encode_frame().unwrap());
        }
        // begun, never committed
        image.extend(
            JournalRecord::Begin {
                txid: TransactionId::new(2),
            }
            .encode_frame()
            .unwrap(),
        );
        image.extend_from_slice(&[0x53, 0x4A, 0x4E]);
        std::fs::write(&path, &image).unwrap();

        let report = verify_journal(&path).unwrap();
        assert_eq!(report.frames, 4);
        assert_eq!(report.committed_transactions, 1);
        assert_eq!(report.incomplete_transactions, 1);
        assert_eq!(report.torn_bytes, 3);
        assert_eq!(report.size, image.len() as u64);
    }
}
