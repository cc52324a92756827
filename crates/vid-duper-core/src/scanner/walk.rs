use crate::error::Error;
use crate::model::FileRecord;
use crate::progress::ProgressReporter;
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, warn};

struct Walker<'a> {
    extensions: Vec<String>,
    ignore_patterns: Vec<Pattern>,
    cancel: &'a AtomicBool,
    reporter: &'a dyn ProgressReporter,
    found: AtomicUsize,
    files: DashMap<PathBuf, FileRecord>,
}

/// Parallel directory traversal producing the candidate set, sorted by
/// canonical path.
///
/// Keeps regular, non-empty files whose extension is in `extensions`
/// (case-insensitive) and that match none of `ignore_globs`. Symlinks are not
/// followed. Roots that do not exist are logged and skipped; a root may also
/// be a single file.
pub fn enumerate_videos(
    root_paths: &[PathBuf],
    extensions: &[String],
    ignore_globs: &[String],
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<FileRecord>, Error> {
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let walker = Walker {
        extensions: extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect(),
        ignore_patterns,
        cancel,
        reporter,
        found: AtomicUsize::new(0),
        files: DashMap::new(),
    };

    root_paths.par_iter().try_for_each(|root| {
        let metadata = match fs::symlink_metadata(root) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Root path {} does not exist, skipping", root.display());
                return Ok(());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if metadata.is_dir() {
            walker.visit_dir(root)
        } else {
            walker.consider_file(root, &metadata);
            Ok(())
        }
    })?;

    if walker.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut records: Vec<FileRecord> = walker.files.into_iter().map(|(_, r)| r).collect();
    records.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Enumerated {} candidate videos", records.len());
    Ok(records)
}

impl Walker<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn has_video_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| *allowed == ext))
    }

    fn visit_dir(&self, dir: &Path) -> Result<(), Error> {
        if self.is_cancelled() || self.is_ignored(dir) {
            return Ok(());
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                error!("Access denied reading directory {}: {}", dir.display(), err);
                return Ok(());
            }
            Err(err) => {
                return Err(Error::Io(io::Error::new(
                    err.kind(),
                    format!("Error reading directory {}: {}", dir.display(), err),
                )));
            }
        };

        entries.par_bridge().try_for_each(|entry_result| {
            if self.is_cancelled() {
                return Ok(());
            }
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in directory {}: {}", dir.display(), err);
                    return Ok(());
                }
            };

            let path = entry.path();
            // symlink_metadata: links are neither followed nor reported.
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!("Metadata unavailable for {}: {}", path.display(), err);
                    return Ok(());
                }
            };

            if metadata.file_type().is_symlink() {
                return Ok(());
            }
            if metadata.is_dir() {
                self.visit_dir(&path)
            } else {
                self.consider_file(&path, &metadata);
                Ok(())
            }
        })
    }

    fn consider_file(&self, path: &Path, metadata: &fs::Metadata) {
        if !metadata.is_file()
            || metadata.len() == 0
            || !self.has_video_extension(path)
            || self.is_ignored(path)
        {
            return;
        }

        let canonical = match fs::canonicalize(path) {
            Ok(p) => p,
            Err(e) => {
                warn!("Error canonicalizing {}: {}", path.display(), e);
                return;
            }
        };
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let record = FileRecord::new(canonical.clone(), metadata.len(), modified);

        if self.files.insert(canonical, record).is_none() {
            let found = self.found.fetch_add(1, Ordering::Relaxed) + 1;
            self.reporter.on_enumerate_progress(found);
        }
    }
}
