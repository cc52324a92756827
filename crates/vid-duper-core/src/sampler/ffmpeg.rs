use super::{sample_timestamps, Deadline, FrameSample, FrameSampler, SampledFrame, SampledVideo};
use crate::error::DecodeError;
use crate::model::VideoMeta;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::FfmpegEvent;
use image::RgbImage;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, trace};

const DEFAULT_FRAME_SIZE: u32 = 64;

/// Frame sampler backed by the `ffprobe` and `ffmpeg` executables.
///
/// Metadata comes from ffprobe. Each timestamp is decoded by its own ffmpeg
/// invocation (input seek, one frame, rawvideo rgb24 on stdout), so a bad
/// region of the file only costs the frames that fall inside it.
#[derive(Debug, Clone)]
pub struct FfmpegSampler {
    frame_size: u32,
}

impl Default for FfmpegSampler {
    fn default() -> Self {
        FfmpegSampler {
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

impl FfmpegSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_meta(&self, path: &Path) -> Result<VideoMeta, DecodeError> {
        let path_str = path.to_string_lossy();
        let info =
            ffprobe::ffprobe(path).map_err(|e| DecodeError::unreadable(path_str.clone(), e))?;

        let stream = info
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| DecodeError::unreadable(path_str.clone(), "no video stream"))?;

        let duration_secs = info
            .format
            .duration
            .as_deref()
            .or(stream.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| DecodeError::unreadable(path_str.clone(), "unknown duration"))?;

        let fps = parse_frame_rate(&stream.avg_frame_rate)
            .or_else(|| parse_frame_rate(&stream.r_frame_rate))
            .unwrap_or(0.0);

        Ok(VideoMeta {
            duration_secs,
            width: stream.width.unwrap_or(0).max(0) as u32,
            height: stream.height.unwrap_or(0).max(0) as u32,
            fps,
        })
    }

    /// Decode one frame. The ffmpeg child is killed if `deadline` passes
    /// before it delivers.
    fn grab_frame(&self, path: &Path, timestamp: f64, deadline: Deadline) -> FrameSample {
        let path_str = path.to_string_lossy();
        let scale = format!("scale={}:{}", self.frame_size, self.frame_size);

        let mut cmd = FfmpegCommand::new();
        cmd.hide_banner()
            .seek(format!("{:.3}", timestamp))
            .input(path_str.as_ref())
            .frames(1)
            .args(["-vf", scale.as_str()])
            .rawvideo();

        let child = Mutex::new(
            cmd.spawn()
                .map_err(|e| DecodeError::unreadable(path_str.clone(), e))?,
        );
        let events = child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map_err(|e| DecodeError::unreadable(path_str.clone(), e))?;

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let (frame, last_error, killed) = thread::scope(|scope| {
            let watchdog = deadline.remaining().map(|left| {
                let child = &child;
                scope.spawn(move || match done_rx.recv_timeout(left) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
                        if let Err(e) = child.kill() {
                            debug!("Failed to kill ffmpeg: {}", e);
                        }
                        true
                    }
                    _ => false,
                })
            });

            let mut frame = None;
            let mut last_error = None;
            for event in events {
                match event {
                    FfmpegEvent::OutputFrame(f) if frame.is_none() => frame = Some(f),
                    FfmpegEvent::Error(line) => last_error = Some(line),
                    _ => {}
                }
            }
            drop(done_tx);

            let killed = watchdog.map_or(false, |w| w.join().unwrap_or(false));
            (frame, last_error, killed)
        });

        let mut child = child.into_inner().unwrap_or_else(|e| e.into_inner());
        match child.wait() {
            Ok(status) if !status.success() && !killed => debug!(
                "ffmpeg exited with {} for {} at {:.3}s",
                status, path_str, timestamp
            ),
            Err(e) => debug!("Failed to reap ffmpeg for {}: {}", path_str, e),
            _ => {}
        }
        if killed {
            return Err(deadline.timeout_error(path));
        }

        let frame = frame.ok_or_else(|| {
            DecodeError::unreadable(
                path_str.clone(),
                last_error.unwrap_or_else(|| format!("no frame at {:.3}s", timestamp)),
            )
        })?;

        trace!(
            "Decoded {}x{} frame at {:.3}s from {}",
            frame.width,
            frame.height,
            timestamp,
            path_str
        );

        let image = RgbImage::from_raw(frame.width, frame.height, frame.data).ok_or_else(|| {
            DecodeError::unreadable(path_str.clone(), "frame buffer size mismatch")
        })?;

        Ok(SampledFrame { timestamp, image })
    }
}

impl FrameSampler for FfmpegSampler {
    fn sample(
        &self,
        path: &Path,
        count: usize,
        deadline: Deadline,
    ) -> Result<SampledVideo, DecodeError> {
        let meta = self.read_meta(path)?;
        debug!(
            "Read {}: {:.1}s {}x{} @ {:.2}fps",
            path.display(),
            meta.duration_secs,
            meta.width,
            meta.height,
            meta.fps
        );

        let mut frames = Vec::with_capacity(count);
        for timestamp in sample_timestamps(meta.duration_secs, count) {
            deadline.check(path)?;
            match self.grab_frame(path, timestamp, deadline) {
                Err(e @ DecodeError::Timeout { .. }) => return Err(e),
                frame => frames.push(frame),
            }
        }

        Ok(SampledVideo {
            path: path.to_path_buf(),
            meta,
            frames,
        })
    }
}

/// Parse an ffprobe rate such as "30000/1001" or "25".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
