//! Validate command implementation.

use stowage_core::PersistenceTools;
use std::path::Path;

/// Runs the validate command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let tools = PersistenceTools::snapshot_tools(path)?;
    let info = tools.info()?;
    println!("Validating {} store(s) in {}", info.guids.len(), path.display());

    tools.validate()?;
    println!("✓ All stores are sealed and consistent");
    Ok(())
}
