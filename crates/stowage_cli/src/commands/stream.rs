//! Export and import command implementations.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use stowage_core::{ManagerConfig, PersistenceManager, StreamStats};

/// Writes store `id` of `path` to the stream file `output`.
pub fn export(path: &Path, id: &str, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let manager = PersistenceManager::new(ManagerConfig::new(path).read_only(true))?;
    let result = (|| -> Result<StreamStats, Box<dyn std::error::Error>> {
        let mut out = BufWriter::new(File::create(output)?);
        let stats = manager.write_store(id, &mut out)?;
        out.flush()?;
        Ok(stats)
    })();
    release(&manager);

    let stats = result?;
    println!(
        "✓ Exported store {id}: {} entries, {} bytes to {}",
        stats.entries,
        stats.bytes,
        output.display()
    );
    Ok(())
}

/// Creates store `id` in `path` from the stream file `input`.
pub fn import(path: &Path, id: &str, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(File::open(input)?);
    let manager = PersistenceManager::new(ManagerConfig::new(path))?;
    let result = manager.read_store(id, &mut reader);
    release(&manager);

    let stats = result?;
    println!(
        "✓ Imported store {id}: {} entries, {} bytes from {}",
        stats.entries,
        stats.bytes,
        input.display()
    );
    Ok(())
}

fn release(manager: &PersistenceManager) {
    for error in manager.release() {
        tracing::warn!(error = %error, "release failed");
    }
}
