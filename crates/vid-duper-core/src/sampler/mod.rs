pub mod ffmpeg;

pub use ffmpeg::FfmpegSampler;

use crate::error::DecodeError;
use crate::model::VideoMeta;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;

/// One frame grabbed at `timestamp` seconds into the video.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub timestamp: f64,
    pub image: RgbImage,
}

/// A frame slot is either a decoded image or the reason it could not be decoded.
pub type FrameSample = Result<SampledFrame, DecodeError>;

#[derive(Debug, Clone)]
pub struct SampledVideo {
    pub path: PathBuf,
    pub meta: VideoMeta,
    pub frames: Vec<FrameSample>,
}

/// Wall-clock budget for decoding one file.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Option<(Instant, Duration)>,
}

impl Deadline {
    pub fn none() -> Self {
        Deadline { limit: None }
    }

    pub fn after(limit: Duration) -> Self {
        Deadline {
            limit: Some((Instant::now() + limit, limit)),
        }
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn timeout_error(&self, path: &Path) -> DecodeError {
        DecodeError::Timeout {
            path: path.to_string_lossy().into_owned(),
            after: self.limit.map_or(Duration::ZERO, |(_, limit)| limit),
        }
    }

    /// `Err(Timeout)` once the budget is spent.
    pub fn check(&self, path: &Path) -> Result<(), DecodeError> {
        if self.is_expired() {
            Err(self.timeout_error(path))
        } else {
            Ok(())
        }
    }
}

/// Frame extraction capability consumed by the engine.
///
/// Implementations return up to `count` frames at evenly spaced timestamps,
/// in timestamp order. A failure to open or inspect the file is a
/// `DecodeError`; a failure on a single frame is reported in its slot.
/// Work must stop, and any child process be killed, once `deadline` expires.
pub trait FrameSampler: Send + Sync {
    fn sample(
        &self,
        path: &Path,
        count: usize,
        deadline: Deadline,
    ) -> Result<SampledVideo, DecodeError>;
}

/// `count` evenly spaced timestamps over `[0, duration)`.
pub fn sample_timestamps(duration_secs: f64, count: usize) -> Vec<f64> {
    if count == 0 || !duration_secs.is_finite() || duration_secs <= 0.0 {
        return vec![0.0; count.min(1)];
    }
    (0..count)
        .map(|i| duration_secs * i as f64 / count as f64)
        .collect()
}

/// Run `sampler` on the calling thread with an optional wall-clock limit.
///
/// The decode never outlives this call, so a caller's worker pool bounds the
/// number of concurrent decodes even when files time out. A sampler that
/// returns after the limit is reported as `DecodeError::Timeout`.
pub fn sample_with_timeout(
    sampler: &dyn FrameSampler,
    path: &Path,
    count: usize,
    timeout: Option<Duration>,
) -> Result<SampledVideo, DecodeError> {
    let deadline = timeout.map_or_else(Deadline::none, Deadline::after);
    let result = sampler.sample(path, count, deadline);
    match result {
        Ok(_) if deadline.is_expired() => {
            warn!("Decoding {} exceeded {:?}", path.display(), timeout);
            Err(deadline.timeout_error(path))
        }
        Err(e @ DecodeError::Timeout { .. }) => {
            warn!("Decoding {} exceeded {:?}", path.display(), timeout);
            Err(e)
        }
        other => other,
    }
}
