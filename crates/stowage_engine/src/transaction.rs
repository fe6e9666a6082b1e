//! Staged write transactions.

use crate::keyspace::NamespaceHandle;
use bytes::Bytes;
use std::fmt;

/// Engine-local transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Put {
        namespace: NamespaceHandle,
        key: Bytes,
        value: Bytes,
    },
    Erase {
        namespace: NamespaceHandle,
        key: Bytes,
    },
}

impl WriteOp {
    pub(crate) fn namespace(&self) -> &NamespaceHandle {
        match self {
            Self::Put { namespace, .. } | Self::Erase { namespace, .. } => namespace,
        }
    }
}

/// A write transaction.
///
/// Writes are buffered in the transaction and reach the journal only on
/// [`crate::Engine::commit`], as a single contiguous `Begin .. Commit`
/// append. Dropping the transaction (or passing it to
/// [`crate::Engine::rollback`]) discards the buffer; nothing is ever
/// journaled for an aborted transaction.
///
/// Reads through the engine do not see a transaction's staged writes.
#[derive(Debug)]
pub struct EngineTransaction {
    pub(crate) engine_id: u64,
    pub(crate) txid: TransactionId,
    pub(crate) ops: Vec<WriteOp>,
}

impl EngineTransaction {
    pub(crate) fn new(engine_id: u64, txid: TransactionId) -> Self {
        Self {
            engine_id,
            txid,
            ops: Vec::new(),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.txid
    }

    /// Stages an upsert of `key` in `namespace`.
    pub fn put(&mut self, namespace: &NamespaceHandle, key: &[u8], value: &[u8]) {
        self.ops.push(WriteOp::Put {
            namespace: namespace.clone(),
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        });
    }

    /// Stages a removal of `key` from `namespace`.
    pub fn delete(&mut self, namespace: &NamespaceHandle, key: &[u8]) {
        self.ops.push(WriteOp::Erase {
            namespace: namespace.clone(),
            key: Bytes::copy_from_slice(key),
        });
    }

    /// Number of staged writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
