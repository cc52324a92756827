use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Container family of a candidate file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoKind {
    Mp4,
    M4v,
    Avi,
    Mkv,
    Mov,
    Wmv,
    Flv,
    Webm,
    ThreeGp,
    Other,
}

impl VideoKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" => VideoKind::Mp4,
            "m4v" => VideoKind::M4v,
            "avi" => VideoKind::Avi,
            "mkv" => VideoKind::Mkv,
            "mov" => VideoKind::Mov,
            "wmv" => VideoKind::Wmv,
            "flv" => VideoKind::Flv,
            "webm" => VideoKind::Webm,
            "3gp" => VideoKind::ThreeGp,
            _ => VideoKind::Other,
        }
    }
}

/// A candidate file discovered during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub kind: VideoKind,
}

impl FileRecord {
    pub fn new(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        let kind = VideoKind::from_path(&path);
        FileRecord {
            path,
            size,
            modified,
            kind,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            path: self.path.to_string_lossy().into_owned(),
            size: self.size,
            modified_ns: system_time_to_nanos(self.modified),
        }
    }
}

/// Cheap identity of a file for cache validity: path, size and mtime.
/// File content is never read to build it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub path: String,
    pub size: u64,
    pub modified_ns: i64,
}

impl Fingerprint {
    /// Key used as the primary key of the signature cache.
    /// Includes subsecond precision so rewrites within one second still miss.
    pub fn key(&self) -> String {
        let secs = self.modified_ns.div_euclid(1_000_000_000);
        let nanos = self.modified_ns.rem_euclid(1_000_000_000);
        format!("{}|{}|{}.{:09}", self.path, self.size, secs, nanos)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

pub(crate) fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Basic stream metadata reported by the frame sampler.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoMeta {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Average frame rate; 0.0 when the container does not report one.
    pub fps: f64,
}

/// Perceptual signature of one video: one 64-bit difference hash per
/// decoded frame, in timestamp order, plus the metadata used for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub frame_hashes: Vec<u64>,
    pub skipped_frames: u32,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub file_size: u64,
}

impl Signature {
    pub fn frame_count(&self) -> usize {
        self.frame_hashes.len()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Average bitrate over the whole file, container overhead included.
    pub fn bitrate_kbps(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.file_size as f64 * 8.0 / self.duration_secs / 1000.0
        } else {
            0.0
        }
    }
}
