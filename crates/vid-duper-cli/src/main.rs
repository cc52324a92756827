mod commands;
mod logging;
mod output;
mod progress;

use std::io::{self, Write};
use std::process;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use indicatif::HumanBytes;
use progress::CliReporter;
use tracing::{error, info, warn};
use vid_duper_core::{AppConfig, CacheStore, ScanEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match vid_duper_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan {
            paths,
            threshold,
            threads,
            samples,
            no_cache,
            csv,
            json,
        }) => {
            let mut config = config;
            if !paths.is_empty() {
                config.root_paths = paths;
            }
            if let Some(threshold) = threshold {
                config.threshold = threshold;
            }
            if let Some(threads) = threads {
                config.thread_count = threads;
            }
            if let Some(samples) = samples {
                config.sample_count = samples;
            }
            if no_cache {
                config.cache_enabled = false;
            }
            if let Err(err) = run_scan(config, csv.as_deref(), json) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::CacheCount) => {
            info!("Counting signature cache entries...");
            match open_cache(&config).and_then(|cache| Ok(cache.len()?)) {
                Ok(count) => info!("Total entries in signature cache: {}", count),
                Err(e) => error!("Error counting cache entries: {}", e),
            }
        }
        Some(Commands::ClearCache) => {
            match prompt_confirm(
                "Are you SURE you want to delete every cached signature?",
                Some(false),
            ) {
                Ok(true) => match open_cache(&config).and_then(|cache| Ok(cache.clear()?)) {
                    Ok(removed) => println!("Signature cache cleared ({} entries)", removed),
                    Err(e) => error!("Error clearing cache: {}", e),
                },
                _ => {
                    process::exit(0);
                }
            }
        }
        Some(Commands::PruneCache) => {
            match open_cache(&config).and_then(|cache| Ok(cache.prune_missing()?)) {
                Ok(removed) => info!("Removed {} entries for missing files", removed),
                Err(e) => error!("Error pruning cache: {}", e),
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn open_cache(config: &AppConfig) -> Result<CacheStore, Box<dyn std::error::Error>> {
    Ok(CacheStore::open(&config.cache_path, config.sample_count)?)
}

fn run_scan(
    config: AppConfig,
    csv_path: Option<&std::path::Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.root_paths.is_empty() {
        return Err("no paths to scan: pass them as arguments or set VID_DUPER_ROOT_PATHS".into());
    }

    let engine = ScanEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.run(&reporter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        output::print_groups(&report);
    }

    if let Some(path) = csv_path {
        let rows = output::write_groups_csv(&report, path)?;
        info!("Wrote {} rows to {}", rows, path.display());
    }

    info!(
        "Enumerate: {}, Hash: {}, Cluster: {}",
        format!("{:.2}s", report.timings.enumerate_secs).green(),
        format!("{:.2}s", report.timings.hash_secs).green(),
        format!("{:.2}s", report.timings.cluster_secs).green(),
    );
    info!(
        "{} videos, {} from cache, {} decoded, {} skipped",
        report.enumerated,
        format!("{}", report.cache.hits).cyan(),
        format!("{}", report.cache.computed).cyan(),
        format!("{}", report.skipped.len()).yellow(),
    );
    info!(
        "{} duplicate groups, {} videos involved, {} reclaimable",
        format!("{}", report.groups.len()).red(),
        format!("{}", report.duplicate_files()).red(),
        format!("{}", HumanBytes(report.reclaimable_bytes)).red(),
    );
    if !report.skipped.is_empty() {
        warn!(
            "{} videos could not be decoded and were left out",
            report.skipped.len()
        );
    }

    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" | "YES" => return Ok(true),
            "N" | "NO" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
