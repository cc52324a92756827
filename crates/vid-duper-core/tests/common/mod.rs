#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use vid_duper_core::sampler::sample_timestamps;
use vid_duper_core::{
    AppConfig, Deadline, DecodeError, FrameSampler, SampledFrame, SampledVideo, VideoMeta,
};

pub const DURATION_SECS: f64 = 60.0;

/// In-process sampler that "decodes" small text files describing a video.
///
/// File content is whitespace-separated `key=value` tokens:
///   seed=N    picture content; equal seeds render the same footage
///   w=, h=    frame size (defaults 72x64; keep multiples of 9x8)
///   noise=N   per-pixel jitter amplitude, deterministic per file
///   fps=N     reported frame rate (default 30)
///   secs=N    reported duration (default 60)
///   frames=N  only the first N sample slots decode; the rest fail
/// A file starting with `CORRUPT` cannot be opened at all.
pub struct FakeSampler {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl FakeSampler {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        FakeSampler {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Decodes still running right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeVideo {
    seed: u64,
    width: u32,
    height: u32,
    noise: u8,
    fps: f64,
    duration_secs: f64,
    frames: Option<usize>,
}

fn parse(path: &Path, text: &str) -> Result<FakeVideo, DecodeError> {
    if text.starts_with("CORRUPT") {
        return Err(DecodeError::unreadable(
            path.to_string_lossy(),
            "moov atom not found",
        ));
    }
    let mut video = FakeVideo {
        seed: 0,
        width: 72,
        height: 64,
        noise: 0,
        fps: 30.0,
        duration_secs: DURATION_SECS,
        frames: None,
    };
    for token in text.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let bad = || DecodeError::unreadable(path.to_string_lossy(), format!("bad token {}", token));
        match key {
            "seed" => video.seed = value.parse().map_err(|_| bad())?,
            "w" => video.width = value.parse().map_err(|_| bad())?,
            "h" => video.height = value.parse().map_err(|_| bad())?,
            "noise" => video.noise = value.parse().map_err(|_| bad())?,
            "fps" => video.fps = value.parse().map_err(|_| bad())?,
            "secs" => video.duration_secs = value.parse().map_err(|_| bad())?,
            "frames" => video.frames = Some(value.parse().map_err(|_| bad())?),
            _ => {}
        }
    }
    Ok(video)
}

pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// 9x8 blocks of pseudo-random grey, stretched to the requested size.
pub fn render_frame(seed: u64, index: usize, width: u32, height: u32, noise: u8) -> RgbImage {
    let cell_w = (width / 9).max(1);
    let cell_h = (height / 8).max(1);
    RgbImage::from_fn(width, height, |x, y| {
        let cx = (x / cell_w).min(8) as u64;
        let cy = (y / cell_h).min(7) as u64;
        let cell = splitmix64(seed.wrapping_mul(1_000_003) ^ ((index as u64) << 16) ^ (cy * 9 + cx));
        let base = 16 + (cell % 224) as i32;
        let jitter = if noise == 0 {
            0
        } else {
            let n = splitmix64(seed ^ ((x as u64) << 32) ^ y as u64 ^ ((index as u64) << 48));
            (n % (2 * noise as u64 + 1)) as i32 - noise as i32
        };
        let v = (base + jitter).clamp(0, 255) as u8;
        Rgb([v, v, v])
    })
}

impl FrameSampler for FakeSampler {
    fn sample(
        &self,
        path: &Path,
        count: usize,
        deadline: Deadline,
    ) -> Result<SampledVideo, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            let wait = deadline.remaining().map_or(self.delay, |left| left.min(self.delay));
            thread::sleep(wait);
            deadline.check(path)?;
        }

        let text = fs::read_to_string(path)
            .map_err(|e| DecodeError::unreadable(path.to_string_lossy(), e))?;
        let video = parse(path, &text)?;

        let frames = sample_timestamps(video.duration_secs, count)
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| {
                if video.frames.is_some_and(|limit| i >= limit) {
                    return Err(DecodeError::unreadable(
                        path.to_string_lossy(),
                        format!("truncated at {:.1}s", timestamp),
                    ));
                }
                Ok(SampledFrame {
                    timestamp,
                    image: render_frame(video.seed, i, video.width, video.height, video.noise),
                })
            })
            .collect();

        Ok(SampledVideo {
            path: path.to_path_buf(),
            meta: VideoMeta {
                duration_secs: video.duration_secs,
                width: video.width,
                height: video.height,
                fps: video.fps,
            },
            frames,
        })
    }
}

pub fn write_video(dir: &Path, name: &str, description: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, description).unwrap();
    path
}

pub fn config_for(root: &Path, cache_path: Option<&Path>) -> AppConfig {
    let mut config = AppConfig {
        root_paths: vec![root.to_string_lossy().into_owned()],
        thread_count: 4,
        sample_count: 10,
        ..AppConfig::default()
    };
    match cache_path {
        Some(path) => config.cache_path = path.to_string_lossy().into_owned(),
        None => config.cache_enabled = false,
    }
    config
}

pub fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
