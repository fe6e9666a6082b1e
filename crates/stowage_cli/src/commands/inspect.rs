//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use stowage_core::{PersistenceTools, StoreStatistics};

/// Directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Inspected directory.
    pub path: String,
    /// Storage format of the stores.
    pub storage_format: String,
    /// Storage version of the stores.
    pub storage_version: u32,
    /// Implementation version of the stores.
    pub impl_version: u32,
    /// Store ids.
    pub stores: Vec<String>,
    /// Per-store figures (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<StoreSummary>>,
}

/// Figures for one store.
#[derive(Debug, Serialize)]
pub struct StoreSummary {
    /// Store id.
    pub store: String,
    /// Number of extents.
    pub extents: usize,
    /// Number of entries.
    pub entries: u64,
    /// Sum of key and value lengths.
    pub bytes: u64,
    /// Whether the store is sealed.
    pub sealed: bool,
    /// Recorded partition count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_count: Option<u32>,
}

impl From<StoreStatistics> for StoreSummary {
    fn from(stats: StoreStatistics) -> Self {
        Self {
            store: stats.guid,
            extents: stats.extents,
            entries: stats.entries,
            bytes: stats.bytes,
            sealed: stats.sealed,
            partition_count: stats.partition_count,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_stats: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tools = PersistenceTools::snapshot_tools(path)?;
    let info = tools.info()?;

    let statistics = if show_stats {
        Some(
            tools
                .statistics()?
                .into_iter()
                .map(StoreSummary::from)
                .collect(),
        )
    } else {
        None
    };

    let result = InspectResult {
        path: path.display().to_string(),
        storage_format: info.storage_format,
        storage_version: info.storage_version,
        impl_version: info.impl_version,
        stores: info.guids,
        statistics,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Stowage Directory Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Format:");
    println!("  Storage format:         {}", result.storage_format);
    println!("  Storage version:        {}", result.storage_version);
    println!("  Implementation version: {}", result.impl_version);
    println!();
    println!("Stores: {}", result.stores.len());

    match &result.statistics {
        Some(statistics) => {
            for store in statistics {
                let seal = match (store.sealed, store.partition_count) {
                    (true, Some(count)) => format!("sealed, {count} partitions"),
                    (true, None) => "sealed".to_string(),
                    (false, _) => "unsealed".to_string(),
                };
                println!(
                    "  {}: {} extents, {} entries, {} ({seal})",
                    store.store,
                    store.extents,
                    store.entries,
                    format_size(store.bytes)
                );
            }
        }
        None => {
            for store in &result.stores {
                println!("  {store}");
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn summary_json_omits_missing_count() {
        let summary = StoreSummary::from(StoreStatistics {
            guid: "s".into(),
            extents: 1,
            ..StoreStatistics::default()
        });
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"store\":\"s\""));
        assert!(!json.contains("partition_count"));
    }
}
