//! Snapshot command implementation.

use super::CommandError;
use std::path::Path;
use stowage_core::{ManagerConfig, PersistenceManager};

/// Opens every store in `path` and writes a snapshot of them to `target`.
pub fn run(path: &Path, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CommandError::NoStores(path.display().to_string()).into());
    }
    let manager = PersistenceManager::new(ManagerConfig::new(path))?;
    let result = snapshot(&manager, path, target);
    for error in manager.release() {
        tracing::warn!(error = %error, "release failed");
    }
    result
}

fn snapshot(
    manager: &PersistenceManager,
    path: &Path,
    target: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let ids = manager.list()?;
    if ids.is_empty() {
        return Err(CommandError::NoStores(path.display().to_string()).into());
    }
    for id in &ids {
        manager.open_store(id)?;
    }

    manager.create_snapshot(target)?;
    println!("✓ Snapshot of {} store(s) written to {}", ids.len(), target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::PersistentStore;
    use tempfile::tempdir;

    #[test]
    fn snapshots_all_stores() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let manager = PersistenceManager::new(ManagerConfig::new(&data)).unwrap();
        for id in ["a", "b"] {
            let store = manager.open_store(id).unwrap();
            store.create_extent(1).unwrap();
            store.store(1, id.as_bytes(), b"v", None).unwrap();
        }
        manager.release();

        let target = dir.path().join("snap");
        run(&data, &target).unwrap();
        assert!(target.join("a").is_dir());
        assert!(target.join("b").is_dir());
    }

    #[test]
    fn refuses_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(run(dir.path(), &dir.path().join("snap")).is_err());
        assert!(run(&dir.path().join("missing"), &dir.path().join("snap")).is_err());
        assert!(!dir.path().join("missing").exists());
    }
}
