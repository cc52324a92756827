use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "vid-duper")]
#[command(about = "Find near-duplicate videos by perceptual frame hashing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan directories for near-duplicate videos
    Scan {
        /// Directories (or files) to scan; defaults to the configured root paths
        paths: Vec<String>,
        /// Similarity threshold in [0.0, 1.0]; higher is stricter
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Number of hashing worker threads
        #[arg(long)]
        threads: Option<usize>,
        /// Frames sampled per video
        #[arg(long)]
        samples: Option<usize>,
        /// Keep signatures in memory only for this run
        #[arg(long)]
        no_cache: bool,
        /// Write one row per group member to this CSV file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Print the full report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Display the number of entries in the signature cache
    CacheCount,
    /// Delete every entry from the signature cache
    ClearCache,
    /// Remove cache entries for files that no longer exist
    PruneCache,
    /// Print configuration values
    PrintConfig,
}
