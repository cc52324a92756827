use crate::cache::{CacheStats, CacheStore};
use crate::cluster::{self, DuplicateGroup};
use crate::config::{self, AppConfig};
use crate::error::{DecodeError, Error};
use crate::hasher::HashComputer;
use crate::model::{FileRecord, Signature};
use crate::progress::{ProgressReporter, ScanPhase, ScanStatus};
use crate::sampler::{self, FfmpegSampler, FrameSampler};
use crate::scanner;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives one scan: enumerate, hash (through the cache), cluster.
pub struct ScanEngine {
    config: AppConfig,
    sampler: Arc<dyn FrameSampler>,
    cancel: Arc<AtomicBool>,
    status: Arc<ScanStatus>,
}

/// A file that was enumerated but produced no signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub record: FileRecord,
    pub error: DecodeError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScanTimings {
    pub enumerate_secs: f64,
    pub hash_secs: f64,
    pub cluster_secs: f64,
}

/// Outcome of a completed scan.
///
/// `enumerated == hashed + skipped.len()` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub groups: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedFile>,
    pub enumerated: usize,
    pub hashed: usize,
    pub cache: CacheStats,
    pub timings: ScanTimings,
    pub reclaimable_bytes: u64,
}

impl ScanReport {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            sampler: Arc::new(FfmpegSampler::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            status: Arc::new(ScanStatus::default()),
        }
    }

    /// Replace the frame source, e.g. with an in-process sampler in tests.
    pub fn with_sampler(mut self, sampler: Arc<dyn FrameSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Shared flag; storing `true` stops the scan before the next file.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn status(&self) -> Arc<ScanStatus> {
        Arc::clone(&self.status)
    }

    /// Run the whole pipeline on the calling thread.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        let outcome = self.execute(reporter);
        self.status.set_phase(terminal_phase(&outcome));
        outcome
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Everything up to, but not including, the terminal phase transition.
    pub(crate) fn execute(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        self.status.reset();
        self.config.validate()?;

        // Phase 1: Enumerate
        self.status.set_phase(ScanPhase::Enumerating);
        let roots: Vec<PathBuf> =
            config::non_overlapping_directories(self.config.root_paths.clone())
                .into_iter()
                .map(PathBuf::from)
                .collect();
        info!("Processing directories: {:?}", roots);

        let cache = self.open_cache()?;

        reporter.on_enumerate_start();
        let enumerate_start = Instant::now();
        let records = scanner::enumerate_videos(
            &roots,
            &self.config.extensions,
            &self.config.ignore_patterns,
            &self.cancel,
            reporter,
        )?;
        let enumerate_secs = enumerate_start.elapsed().as_secs_f64();
        reporter.on_enumerate_complete(records.len(), enumerate_secs);
        debug!(
            "Enumeration completed in {:.2}s: {} candidates",
            enumerate_secs,
            records.len()
        );
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let canonical_roots: Vec<PathBuf> = roots
            .iter()
            .filter_map(|r| fs::canonicalize(r).ok())
            .collect();
        cache.preload(&canonical_roots)?;

        // Phase 2: Hash
        self.status.set_phase(ScanPhase::Hashing);
        info!("Hashing {} videos...", records.len());
        let hash_start = Instant::now();
        let outcomes = self.hash_all(&records, &cache, reporter)?;
        if self.is_cancelled() {
            info!("Scan cancelled during hashing");
            return Err(Error::Cancelled);
        }

        let enumerated = records.len();
        let mut signatures: Vec<(FileRecord, Signature)> = Vec::with_capacity(enumerated);
        let mut skipped: Vec<SkippedFile> = Vec::new();
        for (record, outcome) in records.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(sig)) => signatures.push((record, sig)),
                Some(Err(Error::Decode(e))) => {
                    warn!("Skipping {}: {}", record.path.display(), e);
                    reporter.on_file_skipped(&record.path, &e);
                    skipped.push(SkippedFile { record, error: e });
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Error::Cancelled),
            }
        }
        let hash_secs = hash_start.elapsed().as_secs_f64();
        reporter.on_hash_complete(signatures.len(), skipped.len(), hash_secs);
        let cache_stats = cache.stats();
        debug!(
            "Hashing completed in {:.2}s: {} hashed, {} skipped, {} cache hits, {} computed",
            hash_secs,
            signatures.len(),
            skipped.len(),
            cache_stats.hits,
            cache_stats.computed
        );
        drop(cache);

        // Phase 3: Cluster
        self.status.set_phase(ScanPhase::Clustering);
        info!("Clustering {} signatures...", signatures.len());
        reporter.on_cluster_start(signatures.len());
        let cluster_start = Instant::now();
        let groups = cluster::cluster(
            &signatures,
            self.config.threshold,
            self.config.candidate_strategy(),
        );
        let cluster_secs = cluster_start.elapsed().as_secs_f64();
        reporter.on_cluster_complete(groups.len(), cluster_secs);
        debug!(
            "Clustering completed in {:.2}s: {} groups",
            cluster_secs,
            groups.len()
        );

        let reclaimable_bytes = groups.iter().map(|g| g.reclaimable_bytes).sum();
        Ok(ScanReport {
            groups,
            enumerated,
            hashed: signatures.len(),
            skipped,
            cache: cache_stats,
            timings: ScanTimings {
                enumerate_secs,
                hash_secs,
                cluster_secs,
            },
            reclaimable_bytes,
        })
    }

    fn open_cache(&self) -> Result<CacheStore, Error> {
        let store = if self.config.cache_enabled {
            CacheStore::open(&self.config.cache_path, self.config.sample_count)
        } else {
            CacheStore::in_memory(self.config.sample_count)
        };
        store.map_err(|e| {
            error!("Unable to open signature cache: {}", e);
            match e {
                Error::CacheUnavailable(_) => e,
                other => Error::CacheUnavailable(other.to_string()),
            }
        })
    }

    /// One slot per record; `None` for tasks that never started because the
    /// scan was cancelled or another task hit a fatal error.
    fn hash_all(
        &self,
        records: &[FileRecord],
        cache: &CacheStore,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<Option<Result<Signature, Error>>>, Error> {
        let total = records.len();
        self.status.begin_counting(total);
        reporter.on_hash_start(total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_count)
            .thread_name(|i| format!("vid-duper-hash-{}", i))
            .build()
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

        let hasher = HashComputer::new();
        let sample_count = self.config.sample_count;
        let timeout = self.config.decode_timeout();
        let fatal = AtomicBool::new(false);
        let progress = Mutex::new(());

        let outcomes = pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    if self.is_cancelled() || fatal.load(Ordering::Relaxed) {
                        return None;
                    }

                    let outcome = cache.get_or_compute(record, |r| {
                        let video = sampler::sample_with_timeout(
                            self.sampler.as_ref(),
                            &r.path,
                            sample_count,
                            timeout,
                        )?;
                        hasher.compute(&video, r.size)
                    });

                    if let Err(e) = &outcome {
                        if !matches!(e, Error::Decode(_)) {
                            error!("Fatal error hashing {}: {}", record.path.display(), e);
                            fatal.store(true, Ordering::Relaxed);
                        }
                    }

                    // Serialized so reported counts never go backwards.
                    let _guard = progress.lock().unwrap_or_else(|e| e.into_inner());
                    let completed = self.status.advance();
                    reporter.on_hash_progress(completed, total);

                    Some(outcome)
                })
                .collect::<Vec<_>>()
        });

        let mut outcomes = outcomes;
        let fatal_at = outcomes
            .iter()
            .position(|o| matches!(o, Some(Err(e)) if !matches!(e, Error::Decode(_))));
        if let Some(Some(Err(e))) = fatal_at.map(|pos| outcomes.swap_remove(pos)) {
            return Err(e);
        }
        Ok(outcomes)
    }
}

pub(crate) fn terminal_phase(outcome: &Result<ScanReport, Error>) -> ScanPhase {
    match outcome {
        Ok(_) => ScanPhase::Done,
        Err(Error::Cancelled) => ScanPhase::Cancelled,
        Err(_) => ScanPhase::Failed,
    }
}
