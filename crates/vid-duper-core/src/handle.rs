use crate::config::AppConfig;
use crate::engine::{terminal_phase, ScanEngine, ScanReport};
use crate::error::Error;
use crate::progress::{ProgressReporter, ScanPhase, ScanProgress, ScanStatus, SilentReporter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Outcome = Arc<Mutex<Option<Result<ScanReport, Error>>>>;

/// A scan running on its own thread.
///
/// Progress can be polled and the scan cancelled from any thread. The
/// outcome is stored before the terminal phase is published, so a `Done`
/// phase always has a report behind it.
pub struct ScanHandle {
    status: Arc<ScanStatus>,
    cancel: Arc<AtomicBool>,
    outcome: Outcome,
    thread: Option<JoinHandle<()>>,
}

impl ScanEngine {
    /// Move the engine onto a background thread and return a handle to it.
    pub fn spawn(self, reporter: Arc<dyn ProgressReporter>) -> Result<ScanHandle, Error> {
        let status = self.status();
        let cancel = self.cancel_token();
        let outcome: Outcome = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&outcome);
        let thread_status = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name("vid-duper-scan".to_string())
            .spawn(move || {
                let result = self.execute(reporter.as_ref());
                if let Err(e) = &result {
                    debug!("Scan ended without a report: {}", e);
                }
                let phase = terminal_phase(&result);
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
                thread_status.set_phase(phase);
            })?;

        Ok(ScanHandle {
            status,
            cancel,
            outcome,
            thread: Some(thread),
        })
    }
}

impl ScanHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn poll_progress(&self) -> ScanProgress {
        self.status.snapshot()
    }

    pub fn phase(&self) -> ScanPhase {
        self.status.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    /// The report, once the scan reached `Done`.
    pub fn get_result(&self) -> Option<ScanReport> {
        if self.phase() != ScanPhase::Done {
            return None;
        }
        let slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(Ok(report)) => Some(report.clone()),
            _ => None,
        }
    }

    /// Block until the scan ends and take its outcome.
    pub fn wait(mut self) -> Result<ScanReport, Error> {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Scan thread panicked");
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "scan thread panicked",
                )));
            }
        }
        let taken = self
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        taken.unwrap_or(Err(Error::Cancelled))
    }
}

/// Start a scan over `root_paths` with the ffmpeg-backed sampler.
///
/// `cache_path = None` keeps signatures in memory for this scan only.
/// Configuration is validated before any thread is started.
pub fn start_scan(
    root_paths: Vec<String>,
    threshold: f64,
    thread_count: usize,
    cache_path: Option<&str>,
) -> Result<ScanHandle, Error> {
    let mut config = AppConfig {
        root_paths,
        threshold,
        thread_count,
        ..AppConfig::default()
    };
    match cache_path {
        Some(path) => config.cache_path = path.to_string(),
        None => config.cache_enabled = false,
    }
    config.validate()?;
    ScanEngine::new(config).spawn(Arc::new(SilentReporter))
}

pub fn cancel(handle: &ScanHandle) {
    handle.cancel();
}

pub fn poll_progress(handle: &ScanHandle) -> ScanProgress {
    handle.poll_progress()
}

pub fn get_result(handle: &ScanHandle) -> Option<ScanReport> {
    handle.get_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_scan_rejects_invalid_threshold() {
        let result = start_scan(vec!["/tmp".to_string()], -0.1, 2, None);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_start_scan_rejects_zero_threads() {
        let result = start_scan(vec!["/tmp".to_string()], 0.8, 0, None);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_directory_scan_completes() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start_scan(
            vec![dir.path().to_string_lossy().into_owned()],
            0.8,
            2,
            None,
        )
        .unwrap();
        let report = handle.wait().unwrap();
        assert_eq!(report.enumerated, 0);
        assert!(report.groups.is_empty());
    }
}
