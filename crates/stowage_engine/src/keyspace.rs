//! In-memory namespace state rebuilt from the journal.

use crate::error::{EngineError, EngineResult};
use crate::record::JournalRecord;
use crate::transaction::{TransactionId, WriteOp};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Name of the namespace every engine starts with.
///
/// It can never be created, dropped or renamed.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A reference to one live namespace of one engine.
///
/// Handles are cheap to clone. A handle becomes stale once its namespace
/// is dropped, even if a namespace of the same name is created later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    pub(crate) engine_id: u64,
    pub(crate) name: Arc<str>,
    pub(crate) generation: u64,
}

impl NamespaceHandle {
    /// Returns the namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
pub(crate) struct Namespace {
    pub(crate) generation: u64,
    pub(crate) entries: BTreeMap<Bytes, Bytes>,
}

/// Outcome of replaying a journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ReplaySummary {
    pub(crate) committed: u64,
    pub(crate) discarded: u64,
    pub(crate) max_txid: u64,
}

#[derive(Debug)]
pub(crate) struct Keyspace {
    namespaces: BTreeMap<String, Namespace>,
    next_generation: u64,
}

impl Default for Keyspace {
    fn default() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), Namespace::default());
        Self {
            namespaces,
            next_generation: 1,
        }
    }
}

impl Keyspace {
    pub(crate) fn names(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    pub(crate) fn generation(&self, name: &str) -> Option<u64> {
        self.namespaces.get(name).map(|ns| ns.generation)
    }

    pub(crate) fn create(&mut self, name: &str) -> EngineResult<u64> {
        if self.namespaces.contains_key(name) {
            return Err(EngineError::NamespaceExists {
                name: name.to_string(),
            });
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.namespaces.insert(
            name.to_string(),
            Namespace {
                generation,
                entries: BTreeMap::new(),
            },
        );
        Ok(generation)
    }

    pub(crate) fn drop_namespace(&mut self, name: &str) -> EngineResult<()> {
        if name == DEFAULT_NAMESPACE {
            return Err(EngineError::ReservedNamespace {
                name: name.to_string(),
            });
        }
        self.namespaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NoSuchNamespace {
                name: name.to_string(),
            })
    }

    pub(crate) fn clear(&mut self, name: &str) -> EngineResult<()> {
        self.namespace_mut(name)?.entries.clear();
        Ok(())
    }

    /// Looks up the namespace behind `handle`, rejecting stale handles.
    pub(crate) fn resolve(&self, handle: &NamespaceHandle) -> EngineResult<&Namespace> {
        match self.namespaces.get(handle.name()) {
            Some(ns) if ns.generation == handle.generation => Ok(ns),
            _ => Err(EngineError::StaleHandle {
                name: handle.name().to_string(),
            }),
        }
    }

    fn namespace_mut(&mut self, name: &str) -> EngineResult<&mut Namespace> {
        self.namespaces
            .get_mut(name)
            .ok_or_else(|| EngineError::NoSuchNamespace {
                name: name.to_string(),
            })
    }

    /// Applies a validated write. Callers resolve handles first.
    pub(crate) fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Put {
                namespace,
                key,
                value,
            } => {
                if let Some(ns) = self.namespaces.get_mut(namespace.name()) {
                    ns.entries.insert(key.clone(), value.clone());
                }
            }
            WriteOp::Erase { namespace, key } => {
                if let Some(ns) = self.namespaces.get_mut(namespace.name()) {
                    ns.entries.remove(key);
                }
            }
        }
    }

    /// Rebuilds state from recovered journal records.
    ///
    /// Namespace records apply immediately. Writes are buffered per
    /// transaction and applied when its commit is seen; transactions
    /// without a commit are discarded.
    pub(crate) fn replay(
        &mut self,
        records: Vec<(u64, JournalRecord)>,
    ) -> EngineResult<ReplaySummary> {
        let mut pending: HashMap<TransactionId, Vec<JournalRecord>> = HashMap::new();
        let mut summary = ReplaySummary::default();

        for (offset, record) in records {
            if let Some(txid) = record.txid() {
                summary.max_txid = summary.max_txid.max(txid.as_u64());
            }
            match record {
                JournalRecord::Begin { txid } => {
                    if pending.insert(txid, Vec::new()).is_some() {
                        return Err(EngineError::corruption(
                            offset,
                            format!("{txid} begun twice"),
                        ));
                    }
                }
                JournalRecord::Put { txid, .. } | JournalRecord::Erase { txid, .. } => {
                    pending
                        .get_mut(&txid)
                        .ok_or_else(|| {
                            EngineError::corruption(offset, format!("write for unknown {txid}"))
                        })?
                        .push(record);
                }
                JournalRecord::Commit { txid } => {
                    let writes = pending.remove(&txid).ok_or_else(|| {
                        EngineError::corruption(offset, format!("commit for unknown {txid}"))
                    })?;
                    for write in writes {
                        self.replay_write(offset, write)?;
                    }
                    summary.committed += 1;
                }
                JournalRecord::CreateNamespace { name } => {
                    self.create(&name)
                        .map_err(|e| EngineError::corruption(offset, e.to_string()))?;
                }
                JournalRecord::DropNamespace { name } => {
                    self.drop_namespace(&name)
                        .map_err(|e| EngineError::corruption(offset, e.to_string()))?;
                }
                JournalRecord::ClearNamespace { name } => {
                    self.clear(&name)
                        .map_err(|e| EngineError::corruption(offset, e.to_string()))?;
                }
            }
        }

        summary.discarded = pending.len() as u64;
        Ok(summary)
    }

    fn replay_write(&mut self, offset: u64, write: JournalRecord) -> EngineResult<()> {
        let (namespace, key, value) = match write {
            JournalRecord::Put {
                namespace,
                key,
                value,
                ..
            } => (namespace, key, Some(value)),
            JournalRecord::Erase { namespace, key, .. } => (namespace, key, None),
            _ => return Ok(()),
        };
        let ns = self
            .namespace_mut(&namespace)
            .map_err(|e| EngineError::corruption(offset, e.to_string()))?;
        match value {
            Some(value) => {
                ns.entries.insert(key, value);
            }
            None => {
                ns.entries.remove(&key);
            }
        }
        Ok(())
    }

    /// Produces the shortest journal describing the current state.
    pub(crate) fn compacted_records(&self, txid: TransactionId) -> Vec<JournalRecord> {
        let mut records = Vec::new();
        let mut writes = Vec::new();
        for (name, ns) in &self.namespaces {
            if name != DEFAULT_NAMESPACE {
                records.push(JournalRecord::CreateNamespace { name: name.clone() });
            }
            for (key, value) in &ns.entries {
                writes.push(JournalRecord::Put {
                    txid,
                    namespace: name.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        if !writes.is_empty() {
            records.push(JournalRecord::Begin { txid });
            records.append(&mut writes);
            records.push(JournalRecord::Commit { txid });
        }
        records
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.namespaces.values().map(|ns| ns.entries.len() as u64).sum()
    }

    pub(crate) fn data_bytes(&self) -> u64 {
        self.namespaces
            .values()
            .flat_map(|ns| ns.entries.iter())
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn put(id: u64, ns: &str, key: &'static [u8]) -> JournalRecord {
        JournalRecord::Put {
            txid: tx(id),
            namespace: ns.to_string(),
            key: Bytes::from_static(key),
            value: Bytes::from_static(b"v"),
        }
    }

    fn at(records: Vec<JournalRecord>) -> Vec<(u64, JournalRecord)> {
        records.into_iter().enumerate().map(|(i, r)| (i as u64, r)).collect()
    }

    #[test]
    fn default_namespace_is_reserved() {
        let mut keyspace = Keyspace::default();
        assert_eq!(keyspace.names(), vec![DEFAULT_NAMESPACE.to_string()]);
        assert!(keyspace.create(DEFAULT_NAMESPACE).unwrap_err().is_already_exists());
        assert!(matches!(
            keyspace.drop_namespace(DEFAULT_NAMESPACE),
            Err(EngineError::ReservedNamespace { .. })
        ));
    }

    #[test]
    fn recreated_namespace_gets_new_generation() {
        let mut keyspace = Keyspace::default();
        let first = keyspace.create("5").unwrap();
        keyspace.drop_namespace("5").unwrap();
        let second = keyspace.create("5").unwrap();
        assert_ne!(first, second);

        let stale = NamespaceHandle {
            engine_id: 0,
            name: Arc::from("5"),
            generation: first,
        };
        assert!(matches!(
            keyspace.resolve(&stale),
            Err(EngineError::StaleHandle { .. })
        ));
    }

    #[test]
    fn replay_applies_only_committed() {
        let mut keyspace = Keyspace::default();
        let summary = keyspace
            .replay(at(vec![
                JournalRecord::CreateNamespace { name: "1".into() },
                JournalRecord::Begin { txid: tx(1) },
                put(1, "1", b"a"),
                JournalRecord::Commit { txid: tx(1) },
                JournalRecord::Begin { txid: tx(2) },
                put(2, "1", b"b"),
            ]))
            .unwrap();

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.max_txid, 2);
        let ns = &keyspace.namespaces["1"];
        assert!(ns.entries.contains_key(&b"a"[..]));
        assert!(!ns.entries.contains_key(&b"b"[..]));
    }

    #[test]
    fn replay_rejects_write_outside_transaction() {
        let mut keyspace = Keyspace::default();
        let err = keyspace
            .replay(at(vec![
                JournalRecord::CreateNamespace { name: "1".into() },
                put(9, "1", b"a"),
            ]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Corruption { offset: 1, .. }));
    }

    #[test]
    fn replay_rejects_write_to_missing_namespace() {
        let mut keyspace = Keyspace::default();
        let err = keyspace
            .replay(at(vec![
                JournalRecord::Begin { txid: tx(1) },
                put(1, "404", b"a"),
                JournalRecord::Commit { txid: tx(1) },
            ]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Corruption { offset: 2, .. }));
    }

    #[test]
    fn compaction_reproduces_state() {
        let mut keyspace = Keyspace::default();
        keyspace
            .replay(at(vec![
                JournalRecord::CreateNamespace { name: "1".into() },
                JournalRecord::CreateNamespace { name: "2".into() },
                JournalRecord::Begin { txid: tx(1) },
                put(1, "1", b"a"),
                put(1, "2", b"b"),
                JournalRecord::Commit { txid: tx(1) },
                JournalRecord::ClearNamespace { name: "2".into() },
            ]))
            .unwrap();

        let mut rebuilt = Keyspace::default();
        rebuilt
            .replay(at(keyspace.compacted_records(tx(10))))
            .unwrap();
        assert_eq!(rebuilt.names(), keyspace.names());
        assert_eq!(rebuilt.entry_count(), 1);
        assert_eq!(rebuilt.data_bytes(), 2);
    }
}
