//! Environment scenarios: directory layout, snapshots and release.

use stowage_core::{
    EnvironmentConfig, PersistenceEnvironment, PersistenceError, PersistentStore,
};
use stowage_testkit::prelude::*;
use tempfile::tempdir;

#[test]
fn clashing_directories_are_rejected() {
    let dir = tempdir().unwrap();
    let base = dir.path();

    let same = EnvironmentConfig::new(base.join("x"), base.join("x"));
    assert!(matches!(
        PersistenceEnvironment::new(same),
        Err(PersistenceError::Configuration { .. })
    ));

    let trash = EnvironmentConfig::from_base_dir(base).trash_dir(base.join("active"));
    assert!(matches!(
        PersistenceEnvironment::new(trash),
        Err(PersistenceError::Configuration { .. })
    ));

    let events = EnvironmentConfig::from_base_dir(base).events_dir(base.join("snapshots"));
    assert!(matches!(
        PersistenceEnvironment::new(events),
        Err(PersistenceError::Configuration { .. })
    ));
}

#[test]
fn snapshots_are_isolated_from_active_data() {
    let temp = TempEnvironment::new();
    let active = temp.open_active().unwrap();
    let store = scenarios::populated_store(&active, "s", 1, 3);

    temp.create_snapshot("one").unwrap();
    store.store(1, &scenarios::scenario_key(0), b"two", None).unwrap();
    temp.create_snapshot("two").unwrap();
    assert_eq!(temp.list_snapshots().unwrap(), vec!["one", "two"]);

    let one = temp.open_snapshot("one").unwrap();
    assert_eq!(one.name(), Some("one"));
    let copy = one.open_store("s").unwrap();
    assert_eq!(
        copy.load(1, &scenarios::scenario_key(0)).unwrap().as_deref(),
        Some(scenarios::scenario_value(1, 0).as_slice())
    );
    assert!(matches!(
        one.delete_store("s", false),
        Err(PersistenceError::InvalidArgument { .. })
    ));
    one.release();

    let two = temp.open_snapshot("two").unwrap();
    let copy = two.open_store("s").unwrap();
    assert_eq!(
        copy.load(1, &scenarios::scenario_key(0)).unwrap().as_deref(),
        Some(&b"two"[..])
    );
    two.persistence_tools().validate_consistency(&["s".to_string()]).unwrap();
    two.release();
}

#[test]
fn removed_snapshot_goes_to_trash() {
    with_temp_environment(|env| {
        env.open_active().unwrap().open_store("s").unwrap();
        env.create_snapshot("old").unwrap();
        assert!(env.remove_snapshot("old").unwrap());
        assert!(env.list_snapshots().unwrap().is_empty());
        let trash = env.config().trash_dir.clone().unwrap();
        assert!(trash.join("old").join("s").is_dir());
    });
}

#[test]
fn released_environment_closes_everything() {
    let temp = TempEnvironment::new();
    let active = temp.open_active().unwrap();
    let store = active.open_store("s").unwrap();
    assert!(temp.release().is_empty());
    assert!(!store.is_open());
    assert!(matches!(
        temp.create_snapshot("late"),
        Err(PersistenceError::Released { .. })
    ));
    assert!(matches!(
        active.open_store("s"),
        Err(PersistenceError::Released { what: "manager" })
    ));
}
