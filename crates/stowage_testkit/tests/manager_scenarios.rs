//! Manager scenarios: snapshots, locking, metadata and store lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stowage_core::seal;
use stowage_core::{
    EngineKind, Heartbeat, ManagerConfig, PersistenceError, PersistenceManager, PersistenceResult,
    PersistenceTools, PersistentStore, StoreMetadata, StoreState,
};
use stowage_testkit::prelude::*;
use tempfile::tempdir;

#[test]
fn snapshot_preserves_point_in_time_contents() {
    let temp = TempManager::new();
    let store = scenarios::populated_store(&temp, "s", 2, 10);
    temp.open_store("empty").unwrap();

    let target = temp.root().join("snap");
    temp.create_snapshot(&target).unwrap();
    store.store(1, &scenarios::scenario_key(0), b"changed", None).unwrap();
    store.delete_extent(2).unwrap();

    let snapshot = temp.open_snapshot(&target, "snap").unwrap();
    assert!(snapshot.is_read_only());
    assert_eq!(snapshot.list().unwrap(), vec!["empty", "s"]);

    let copy = snapshot.open_store("s").unwrap();
    assert_eq!(
        copy.load(1, &scenarios::scenario_key(0)).unwrap().as_deref(),
        Some(scenarios::scenario_value(1, 0).as_slice())
    );
    assert_eq!(
        copy.load(2, &scenarios::scenario_key(9)).unwrap().as_deref(),
        Some(scenarios::scenario_value(2, 9).as_slice())
    );
    assert!(copy.store(1, b"k", b"v", None).is_err());
    assert!(copy.is_read_only());
    snapshot.release();

    assert_eq!(
        store.load(1, &scenarios::scenario_key(0)).unwrap().as_deref(),
        Some(&b"changed"[..])
    );
}

#[test]
fn snapshot_never_splits_a_transaction() {
    let temp = TempManager::new();
    let store = temp.open_store("s").unwrap();
    store.create_extent(1).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut round = 0u64;
            while !stop.load(Ordering::Acquire) {
                round += 1;
                let value = round.to_be_bytes();
                let mut txn = store.begin().unwrap();
                store.store(1, b"left", &value, Some(&mut txn)).unwrap();
                store.store(1, b"right", &value, Some(&mut txn)).unwrap();
                store.commit(txn).unwrap();
            }
        })
    };

    for i in 0..5 {
        let target = temp.root().join(format!("snap-{i}"));
        temp.create_snapshot(&target).unwrap();
        let snapshot = temp.open_snapshot(&target, "snap").unwrap();
        let copy = snapshot.open_store("s").unwrap();
        assert_eq!(copy.load(1, b"left").unwrap(), copy.load(1, b"right").unwrap());
        snapshot.release();
    }
    stop.store(true, Ordering::Release);
    writer.join().unwrap();
}

#[test]
fn visitor_can_read_while_snapshot_waits() {
    let temp = TempManager::new();
    let store = scenarios::populated_store(&temp, "s", 1, 2);
    let target = temp.root().join("snap");

    let (done, finished) = std::sync::mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(move || {
            let nested = Arc::clone(&store);
            let mut visitor = |extent: u64, key: &[u8], _: &[u8]| -> PersistenceResult<bool> {
                thread::sleep(Duration::from_millis(200));
                nested.load(extent, key)?;
                Ok(true)
            };
            let _ = done.send(store.iterate(&mut visitor).is_ok());
        });
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            temp.create_snapshot(&target).unwrap();
        });

        let ok = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("nested load hung behind the queued snapshot");
        assert!(ok);
    });
    assert!(target.join("s").is_dir());
}

#[test]
fn snapshot_refuses_existing_lock_marker() {
    let temp = TempManager::new();
    temp.open_store("s").unwrap();
    let target = temp.root().join("snap");
    std::fs::create_dir_all(target.join("s")).unwrap();
    std::fs::write(target.join("s").join(stowage_engine::LOCK_FILE), b"").unwrap();

    match temp.create_snapshot(&target) {
        Err(PersistenceError::Snapshot { store_dir, .. }) => assert_eq!(store_dir, target.join("s")),
        other => panic!("expected snapshot failure, got {other:?}"),
    }
}

#[test]
fn second_instance_cannot_open_a_locked_store() {
    let temp = TempManager::new();
    temp.open_store("s").unwrap();

    let other = PersistenceManager::new(ManagerConfig::new(temp.data_dir())).unwrap();
    let err = other.open_store("s").unwrap_err();
    assert!(err.is_storage_open(), "unexpected error: {err}");

    temp.close_store("s");
    other.open_store("s").unwrap();
    other.release();
}

#[test]
fn inconsistent_metadata_names_the_store() {
    let temp = TempManager::new();
    for id in ["a", "b", "c"] {
        let store = temp.open_store(id).unwrap();
        seal::seal(store.as_ref(), 16, None).unwrap();
    }
    temp.manager.release();

    let kind = EngineKind::Journal;
    StoreMetadata::new(kind.impl_version() + 1, kind.storage_format(), kind.storage_version())
        .write(&temp.data_dir().join("b"))
        .unwrap();

    let tools = PersistenceTools::new(temp.data_dir().to_path_buf(), kind, None);
    let guids = tools.info().unwrap().guids;
    assert_eq!(guids, vec!["a", "b", "c"]);
    match tools.validate_consistency(&guids) {
        Err(PersistenceError::MetadataInconsistent { path, guid }) => {
            assert_eq!(path, temp.data_dir());
            assert_eq!(guid, "b");
        }
        other => panic!("expected inconsistency, got {other:?}"),
    }
    assert!(tools.validate_consistency(&["a".to_string(), "c".to_string()]).is_ok());
}

#[test]
fn validate_requires_sealed_stores() {
    let temp = TempManager::new();
    let sealed = temp.open_store("sealed").unwrap();
    seal::seal(sealed.as_ref(), 8, None).unwrap();
    temp.open_store("unsealed").unwrap();
    let target = temp.root().join("snap");
    temp.create_snapshot(&target).unwrap();

    let beats = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&beats);
    let tools = PersistenceTools::snapshot_tools(&target)
        .unwrap()
        .with_heartbeat(Heartbeat::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
    match tools.validate() {
        Err(PersistenceError::StoreNotSealed { store_id }) => assert_eq!(store_id, "unsealed"),
        other => panic!("expected unsealed store, got {other:?}"),
    }

    let stats = tools.statistics().unwrap();
    assert_eq!(stats.len(), 2);
    assert!(stats[0].sealed);
    assert_eq!(stats[0].partition_count, Some(8));
    assert!(!stats[1].sealed);
    assert!(beats.load(Ordering::Relaxed) >= 2);
}

#[test]
fn safe_delete_moves_store_to_trash() {
    let temp = TempManager::new();
    scenarios::populated_store(&temp, "s", 1, 3);

    assert!(temp.delete_store("s", true).unwrap());
    assert!(!temp.data_dir().join("s").exists());
    assert!(temp.trash_dir().join("s").join(stowage_core::META_FILENAME).is_file());
    assert!(temp.list().unwrap().is_empty());

    scenarios::populated_store(&temp, "s", 1, 1);
    assert!(temp.delete_store("s", true).unwrap());
    assert!(temp.trash_dir().join("s.1").is_dir());

    assert!(!temp.delete_store("ghost", true).unwrap());
}

#[test]
fn unsafe_delete_removes_store() {
    let temp = TempManager::new();
    let store = scenarios::populated_store(&temp, "s", 1, 3);
    assert!(temp.delete_store("s", false).unwrap());
    assert_eq!(store.state(), StoreState::Deleted);
    assert!(!temp.data_dir().join("s").exists());
    assert!(!temp.trash_dir().exists());

    let reopened = temp.open_store("s").unwrap();
    let mut ids = std::collections::BTreeSet::new();
    reopened.load_extent_ids(&mut ids).unwrap();
    assert!(ids.is_empty());
}

#[test]
fn concurrent_opens_share_one_store() {
    let temp = TempManager::new();
    let stores: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = &temp.manager;
                scope.spawn(move || {
                    let id = if i % 2 == 0 { "even" } else { "odd" };
                    manager.open_store(id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for pair in stores.chunks(2) {
        assert!(pair.iter().all(|s| s.is_open()));
    }
    assert!(Arc::ptr_eq(&stores[0], &stores[2]));
    assert!(Arc::ptr_eq(&stores[1], &stores[3]));
    assert_eq!(temp.list_open(), vec!["even", "odd"]);
}

#[test]
fn open_store_from_copies_another_store() {
    let temp = TempManager::new();
    let source = scenarios::populated_store(&temp, "source", 2, 5);

    let copy = temp.open_store_from("copy", source.as_ref()).unwrap();
    assert_eq!(
        copy.load(2, &scenarios::scenario_key(3)).unwrap().as_deref(),
        Some(scenarios::scenario_value(2, 3).as_slice())
    );
    assert!(temp.data_dir().join("copy").join(stowage_core::META_FILENAME).is_file());

    assert!(matches!(
        temp.open_store_from("copy", source.as_ref()),
        Err(PersistenceError::StoreOpen { .. })
    ));
}

#[test]
fn events_store_lives_in_events_directory() {
    let dir = tempdir().unwrap();
    let config = ManagerConfig::new(dir.path().join("data")).events_dir(dir.path().join("events"));
    let manager = PersistenceManager::new(config).unwrap();

    let active = manager.open_active().unwrap();
    assert_eq!(active.id(), stowage_core::ACTIVE_STORE_ID);
    let events = manager.open_events().unwrap().unwrap();
    assert_eq!(
        events.data_dir(),
        dir.path().join("events").join(stowage_core::EVENTS_STORE_ID)
    );
    assert!(Arc::ptr_eq(&events, &manager.open_events().unwrap().unwrap()));

    manager.release();
    assert!(!events.is_open());
    assert!(matches!(
        manager.open_store("x"),
        Err(PersistenceError::Released { what: "manager" })
    ));
}
