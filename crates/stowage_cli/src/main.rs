//! Stowage CLI
//!
//! Offline tools for Stowage persistence directories.
//!
//! # Commands
//!
//! - `inspect` - Show the stores of a directory with their versions and sizes
//! - `validate` - Check that every store is sealed and versions agree
//! - `verify` - Check the journal framing and checksums of every store
//! - `snapshot` - Write a snapshot of a data directory
//! - `export` / `import` - Move one store through the portable stream format

mod commands;

use clap::{Parser, Subcommand};
use commands::CommandError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Stowage persistence directory tools.
#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data or snapshot directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the stores of a directory with their versions and sizes
    Inspect {
        /// Also count extents and entries of every store
        #[arg(short, long)]
        stats: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that every store is sealed and versions agree
    Validate,

    /// Check the journal framing and checksums of every store
    Verify {
        /// Only verify this store
        #[arg(short, long)]
        store: Option<String>,
    },

    /// Write a snapshot of every store in the directory
    Snapshot {
        /// Directory to write the snapshot into
        #[arg(short, long)]
        target: PathBuf,
    },

    /// Write one store to a stream file
    Export {
        /// Store id
        #[arg(short, long)]
        store: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create one store from a stream file
    Import {
        /// Store id
        #[arg(short, long)]
        store: String,

        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { stats, format } => {
            let path = cli.path.ok_or(CommandError::MissingPath("inspect"))?;
            commands::inspect::run(&path, stats, &format)?;
        }
        Commands::Validate => {
            let path = cli.path.ok_or(CommandError::MissingPath("validate"))?;
            commands::validate::run(&path)?;
        }
        Commands::Verify { store } => {
            let path = cli.path.ok_or(CommandError::MissingPath("verify"))?;
            commands::verify::run(&path, store.as_deref())?;
        }
        Commands::Snapshot { target } => {
            let path = cli.path.ok_or(CommandError::MissingPath("snapshot"))?;
            commands::snapshot::run(&path, &target)?;
        }
        Commands::Export { store, output } => {
            let path = cli.path.ok_or(CommandError::MissingPath("export"))?;
            commands::stream::export(&path, &store, &output)?;
        }
        Commands::Import { store, input } => {
            let path = cli.path.ok_or(CommandError::MissingPath("import"))?;
            commands::stream::import(&path, &store, &input)?;
        }
        Commands::Version => {
            println!("Stowage CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Stowage Core v{}", stowage_core::VERSION);
            println!(
                "Storage format {} v{}",
                stowage_engine::ENGINE_FORMAT,
                stowage_engine::ENGINE_FORMAT_VERSION
            );
        }
    }

    Ok(())
}
