//! Verify command implementation.

use super::CommandError;
use std::fs;
use std::path::{Path, PathBuf};
use stowage_engine::{verify_journal, JournalReport, JOURNAL_FILE};

/// Runs the verify command over every store directory in `path`, or over
/// `store` only.
pub fn run(path: &Path, store: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let stores = match store {
        Some(id) => vec![(id.to_string(), path.join(id))],
        None => store_dirs(path)?,
    };
    if stores.is_empty() {
        return Err(CommandError::NoStores(path.display().to_string()).into());
    }

    println!("Verifying {} store(s) in {}", stores.len(), path.display());
    println!();

    let mut failed = 0;
    for (id, dir) in &stores {
        let journal = dir.join(JOURNAL_FILE);
        if !journal.exists() {
            println!("  {id}: no journal (empty store)");
            continue;
        }
        match verify_journal(&journal) {
            Ok(report) => print_report(id, &report),
            Err(e) => {
                failed += 1;
                println!("  {id}: ✗ {e}");
            }
        }
    }

    println!();
    if failed == 0 {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err(CommandError::VerificationFailed(failed).into())
    }
}

fn print_report(id: &str, report: &JournalReport) {
    println!(
        "  {id}: ✓ {} frames, {} committed transactions, {} bytes",
        report.frames, report.committed_transactions, report.size
    );
    if report.incomplete_transactions > 0 {
        println!(
            "      {} incomplete transaction(s) will be discarded on open",
            report.incomplete_transactions
        );
    }
    if report.torn_bytes > 0 {
        println!(
            "      {} byte torn tail will be truncated on open",
            report.torn_bytes
        );
    }
}

fn store_dirs(path: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut stores = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            stores.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    stores.sort();
    Ok(stores)
}
