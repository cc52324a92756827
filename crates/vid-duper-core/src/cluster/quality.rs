use crate::model::Signature;
use serde::Serialize;
use std::fmt;

const BITRATE_DELTA_KBPS: f64 = 500.0;
const SIZE_DELTA_BYTES: u64 = 50 * 1024 * 1024;
const DURATION_DELTA_SECS: f64 = 30.0;

const PIXELS_1080P: u64 = 1920 * 1080;
const PIXELS_4K: u64 = 4096 * 2160;

/// Weighted quality estimate: resolution 0.4, bitrate 0.3, megabytes per
/// minute 0.2, duration 0.1. Each factor is capped, so the score tops out at
/// 1.08 for material above 1080p and 1.0 otherwise.
pub fn quality_score(sig: &Signature) -> f64 {
    let pixels = sig.pixel_count();
    let resolution = if pixels > PIXELS_1080P {
        (1.0 + (pixels - PIXELS_1080P) as f64 / (PIXELS_4K - PIXELS_1080P) as f64 * 0.2).min(1.2)
    } else if pixels >= PIXELS_1080P {
        1.0
    } else if pixels >= 1280 * 720 {
        0.8
    } else if pixels >= 854 * 480 {
        0.6
    } else if pixels >= 640 * 360 {
        0.4
    } else {
        0.0
    };

    let bitrate = (sig.bitrate_kbps() / 5000.0).min(1.0);

    let megabytes = sig.file_size as f64 / (1024.0 * 1024.0);
    let per_minute = if sig.duration_secs > 0.0 {
        megabytes / (sig.duration_secs / 60.0)
    } else {
        0.0
    };
    let size = (per_minute / 50.0).min(1.0);

    let duration = (sig.duration_secs / 7200.0).clamp(0.0, 1.0);

    let score = resolution * 0.4 + bitrate * 0.3 + size * 0.2 + duration * 0.1;
    (score * 1000.0).round() / 1000.0
}

/// A notable way in which a duplicate differs from the copy being kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityDifference {
    Resolution { kept: (u32, u32), other: (u32, u32) },
    Bitrate { kept_kbps: f64, other_kbps: f64 },
    FileSize { kept_bytes: u64, other_bytes: u64 },
    Duration { kept_secs: f64, other_secs: f64 },
}

fn winner(kept_larger: bool) -> &'static str {
    if kept_larger {
        "kept copy"
    } else {
        "this copy"
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let total = secs as u64;
        format!("{}m {}s", total / 60, total % 60)
    } else {
        let total = secs as u64;
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

impl fmt::Display for QualityDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QualityDifference::Resolution { kept, other } => {
                let kept_larger = kept.0 as u64 * kept.1 as u64 > other.0 as u64 * other.1 as u64;
                let (hi, lo) = if kept_larger { (kept, other) } else { (other, kept) };
                write!(
                    f,
                    "{} has higher resolution ({}x{} vs {}x{})",
                    winner(kept_larger),
                    hi.0,
                    hi.1,
                    lo.0,
                    lo.1
                )
            }
            QualityDifference::Bitrate {
                kept_kbps,
                other_kbps,
            } => {
                let kept_larger = kept_kbps > other_kbps;
                let (hi, lo) = if kept_larger {
                    (kept_kbps, other_kbps)
                } else {
                    (other_kbps, kept_kbps)
                };
                write!(
                    f,
                    "{} has higher bitrate ({:.0} kbps vs {:.0} kbps)",
                    winner(kept_larger),
                    hi,
                    lo
                )
            }
            QualityDifference::FileSize {
                kept_bytes,
                other_bytes,
            } => {
                let kept_larger = kept_bytes > other_bytes;
                let (hi, lo) = if kept_larger {
                    (kept_bytes, other_bytes)
                } else {
                    (other_bytes, kept_bytes)
                };
                let mb = |b: u64| b as f64 / (1024.0 * 1024.0);
                write!(
                    f,
                    "{} is larger ({:.1} MB vs {:.1} MB)",
                    winner(kept_larger),
                    mb(hi),
                    mb(lo)
                )
            }
            QualityDifference::Duration {
                kept_secs,
                other_secs,
            } => {
                let kept_larger = kept_secs > other_secs;
                let (hi, lo) = if kept_larger {
                    (kept_secs, other_secs)
                } else {
                    (other_secs, kept_secs)
                };
                write!(
                    f,
                    "{} is longer ({} vs {})",
                    winner(kept_larger),
                    format_duration(hi),
                    format_duration(lo)
                )
            }
        }
    }
}

/// Differences between the kept copy and `other` worth showing to a user.
/// Empty when the two are of comparable quality.
pub fn quality_differences(kept: &Signature, other: &Signature) -> Vec<QualityDifference> {
    let mut differences = Vec::new();

    if kept.pixel_count() != other.pixel_count() {
        differences.push(QualityDifference::Resolution {
            kept: (kept.width, kept.height),
            other: (other.width, other.height),
        });
    }

    let (kept_kbps, other_kbps) = (kept.bitrate_kbps(), other.bitrate_kbps());
    if (kept_kbps - other_kbps).abs() > BITRATE_DELTA_KBPS {
        differences.push(QualityDifference::Bitrate {
            kept_kbps,
            other_kbps,
        });
    }

    if kept.file_size.abs_diff(other.file_size) > SIZE_DELTA_BYTES {
        differences.push(QualityDifference::FileSize {
            kept_bytes: kept.file_size,
            other_bytes: other.file_size,
        });
    }

    if (kept.duration_secs - other.duration_secs).abs() > DURATION_DELTA_SECS {
        differences.push(QualityDifference::Duration {
            kept_secs: kept.duration_secs,
            other_secs: other.duration_secs,
        });
    }

    differences
}
