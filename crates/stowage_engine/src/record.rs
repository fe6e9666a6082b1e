//! Journal records and their frame encoding.
//!
//! Every record is written as one frame:
//!
//! ```text
//! | magic "SJNL" (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC covers the header and payload.
//! Strings are encoded as `u16` length + UTF-8, byte strings as `u32`
//! length + bytes.

use crate::error::{EngineError, EngineResult};
use crate::transaction::TransactionId;
use bytes::Bytes;

/// Magic bytes opening every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SJNL";

/// Current frame format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Frame header size: magic + version + type + length.
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Type tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Opens a transaction.
    Begin = 1,
    /// Upserts one key.
    Put = 2,
    /// Removes one key.
    Erase = 3,
    /// Commits a transaction.
    Commit = 4,
    /// Creates a namespace.
    CreateNamespace = 5,
    /// Drops a namespace with its contents.
    DropNamespace = 6,
    /// Removes every key of a namespace.
    ClearNamespace = 7,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Erase),
            4 => Some(Self::Commit),
            5 => Some(Self::CreateNamespace),
            6 => Some(Self::DropNamespace),
            7 => Some(Self::ClearNamespace),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Opens transaction `txid`.
    Begin {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Upserts `key` in `namespace` as part of `txid`.
    Put {
        /// Transaction id.
        txid: TransactionId,
        /// Target namespace.
        namespace: String,
        /// Key bytes.
        key: Bytes,
        /// Value bytes.
        value: Bytes,
    },
    /// Removes `key` from `namespace` as part of `txid`.
    Erase {
        /// Transaction id.
        txid: TransactionId,
        /// Target namespace.
        namespace: String,
        /// Key bytes.
        key: Bytes,
    },
    /// Commits transaction `txid`.
    Commit {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Creates namespace `name`.
    CreateNamespace {
        /// Namespace name.
        name: String,
    },
    /// Drops namespace `name`.
    DropNamespace {
        /// Namespace name.
        name: String,
    },
    /// Empties namespace `name`.
    ClearNamespace {
        /// Namespace name.
        name: String,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Put { .. } => RecordType::Put,
            Self::Erase { .. } => RecordType::Erase,
            Self::Commit { .. } => RecordType::Commit,
            Self::CreateNamespace { .. } => RecordType::CreateNamespace,
            Self::DropNamespace { .. } => RecordType::DropNamespace,
            Self::ClearNamespace { .. } => RecordType::ClearNamespace,
        }
    }

    /// Returns the owning transaction, if the record belongs to one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Erase { txid, .. }
            | Self::Commit { txid } => Some(*txid),
            _ => None,
        }
    }

    /// Serializes the record payload (without frame).
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace name, key or value exceeds its
    /// length prefix.
    pub fn encode_payload(&self) -> EngineResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txid } | Self::Commit { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }
            Self::Put {
                txid,
                namespace,
                key,
                value,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_str(&mut buf, namespace)?;
                put_bytes(&mut buf, key)?;
                put_bytes(&mut buf, value)?;
            }
            Self::Erase {
                txid,
                namespace,
                key,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_str(&mut buf, namespace)?;
                put_bytes(&mut buf, key)?;
            }
            Self::CreateNamespace { name }
            | Self::DropNamespace { name }
            | Self::ClearNamespace { name } => {
                put_str(&mut buf, name)?;
            }
        }
        Ok(buf)
    }

    /// Serializes the record into a complete frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn encode_frame(&self) -> EngineResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| EngineError::invalid_argument("journal record payload too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.record_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// `offset` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corruption`] if the payload is malformed.
    pub fn decode_payload(
        record_type: RecordType,
        payload: &[u8],
        offset: u64,
    ) -> EngineResult<Self> {
        let mut cursor = PayloadCursor {
            payload,
            pos: 0,
            offset,
        };

        let record = match record_type {
            RecordType::Begin => Self::Begin {
                txid: TransactionId::new(cursor.u64()?),
            },
            RecordType::Commit => Self::Commit {
                txid: TransactionId::new(cursor.u64()?),
            },
            RecordType::Put => Self::Put {
                txid: TransactionId::new(cursor.u64()?),
                namespace: cursor.string()?,
                key: cursor.bytes()?,
                value: cursor.bytes()?,
            },
            RecordType::Erase => Self::Erase {
                txid: TransactionId::new(cursor.u64()?),
                namespace: cursor.string()?,
                key: cursor.bytes()?,
            },
            RecordType::CreateNamespace => Self::CreateNamespace {
                name: cursor.string()?,
            },
            RecordType::DropNamespace => Self::DropNamespace {
                name: cursor.string()?,
            },
            RecordType::ClearNamespace => Self::ClearNamespace {
                name: cursor.string()?,
            },
        };

        if cursor.pos != payload.len() {
            return Err(EngineError::corruption(
                offset,
                format!(
                    "trailing bytes in {:?} record: used {} of {}",
                    record_type,
                    cursor.pos,
                    payload.len()
                ),
            ));
        }
        Ok(record)
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> EngineResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| EngineError::invalid_argument(format!("namespace name too long: {s:.32}...")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> EngineResult<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        EngineError::invalid_argument(format!("{} byte field exceeds 4 GiB", bytes.len()))
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct PayloadCursor<'a> {
    payload: &'a [u8],
    pos: usize,
    offset: u64,
}

impl<'a> PayloadCursor<'a> {
    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| EngineError::corruption(self.offset, "unexpected end of payload"))?;
        let slice = &self.payload[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> EngineResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn string(&mut self) -> EngineResult<String> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        let len = usize::from(u16::from_le_bytes(raw));
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EngineError::corruption(self.offset, "namespace name is not UTF-8"))
    }

    fn bytes(&mut self) -> EngineResult<Bytes> {
        let len = self.u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}

/// Computes the CRC32 (IEEE) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(ns: &str, key: &[u8], value: &[u8]) -> JournalRecord {
        JournalRecord::Put {
            txid: TransactionId::new(7),
            namespace: ns.to_string(),
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn record_type_bytes() {
        for t in [
            RecordType::Begin,
            RecordType::Put,
            RecordType::Erase,
            RecordType::Commit,
            RecordType::CreateNamespace,
            RecordType::DropNamespace,
            RecordType::ClearNamespace,
        ] {
            assert_eq!(RecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(RecordType::from_byte(0), None);
        assert_eq!(RecordType::from_byte(8), None);
    }

    #[test]
    fn put_payload_decodes() {
        let record = put("42", b"key", b"value");
        let payload = record.encode_payload().unwrap();
        let decoded = JournalRecord::decode_payload(RecordType::Put, &payload, 0).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.txid(), Some(TransactionId::new(7)));
    }

    #[test]
    fn frame_layout() {
        let record = JournalRecord::CreateNamespace {
            name: "3".to_string(),
        };
        let frame = record.encode_frame().unwrap();

        assert_eq!(&frame[0..4], &JOURNAL_MAGIC);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), JOURNAL_VERSION);
        assert_eq!(frame[6], RecordType::CreateNamespace.as_byte());
        assert_eq!(u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]), 3);
        assert_eq!(frame.len(), HEADER_SIZE + 3 + CRC_SIZE);

        let body_end = frame.len() - CRC_SIZE;
        let stored = u32::from_le_bytes([
            frame[body_end],
            frame[body_end + 1],
            frame[body_end + 2],
            frame[body_end + 3],
        ]);
        assert_eq!(stored, compute_crc32(&frame[..body_end]));
        assert_eq!(record.txid(), None);
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let payload = put("1", b"k", b"v").encode_payload().unwrap();
        let err =
            JournalRecord::decode_payload(RecordType::Put, &payload[..payload.len() - 1], 99)
                .unwrap_err();
        assert!(matches!(err, EngineError::Corruption { offset: 99, .. }));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut payload = JournalRecord::Commit {
            txid: TransactionId::new(1),
        }
        .encode_payload()
        .unwrap();
        payload.push(0);
        assert!(JournalRecord::decode_payload(RecordType::Commit, &payload, 0).is_err());
    }

    #[test]
    fn non_utf8_namespace_is_corruption() {
        let payload = vec![2, 0, 0xFF, 0xFE];
        let err = JournalRecord::decode_payload(RecordType::DropNamespace, &payload, 5).unwrap_err();
        assert!(matches!(err, EngineError::Corruption { offset: 5, .. }));
    }
}
