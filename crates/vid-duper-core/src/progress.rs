use crate::error::DecodeError;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif; the engine itself only needs
/// [`SilentReporter`]. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_enumerate_start(&self) {}
    fn on_enumerate_progress(&self, _files_found: usize) {}
    fn on_enumerate_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_hash_start(&self, _total_files: usize) {}
    fn on_hash_progress(&self, _completed: usize, _total_files: usize) {}
    fn on_file_skipped(&self, _path: &Path, _error: &DecodeError) {}
    fn on_hash_complete(&self, _hashed: usize, _skipped: usize, _duration_secs: f64) {}
    fn on_cluster_start(&self, _signatures: usize) {}
    fn on_cluster_complete(&self, _groups: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanPhase {
    Idle,
    Enumerating,
    Hashing,
    Clustering,
    Done,
    Cancelled,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Done | ScanPhase::Cancelled | ScanPhase::Failed)
    }
}

/// Snapshot returned by `poll_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub completed: usize,
    pub total: usize,
    pub phase: ScanPhase,
}

/// Shared, pollable state of a running scan.
#[derive(Debug)]
pub struct ScanStatus {
    phase: Mutex<ScanPhase>,
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl Default for ScanStatus {
    fn default() -> Self {
        ScanStatus {
            phase: Mutex::new(ScanPhase::Idle),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }
}

impl ScanStatus {
    pub fn phase(&self) -> ScanPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Terminal phases are sticky.
    pub(crate) fn set_phase(&self, next: ScanPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if !phase.is_terminal() {
            *phase = next;
        }
    }

    pub(crate) fn reset(&self) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = ScanPhase::Idle;
        self.begin_counting(0);
    }

    pub(crate) fn begin_counting(&self, total: usize) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Returns the new completed count.
    pub(crate) fn advance(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> ScanProgress {
        // Read phase first so a Done phase never pairs with a stale counter.
        let phase = self.phase();
        ScanProgress {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            phase,
        }
    }
}
