pub mod dhash;

pub use dhash::{difference_hash, hamming_distance, HASH_BITS};

use crate::error::DecodeError;
use crate::model::Signature;
use crate::sampler::SampledVideo;
use tracing::debug;

/// Turns sampled frames into a [`Signature`].
///
/// Frames are hashed independently and kept in sampling order. Frames that
/// failed to decode are skipped and counted, never substituted.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashComputer;

impl HashComputer {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, video: &SampledVideo, file_size: u64) -> Result<Signature, DecodeError> {
        let mut frame_hashes = Vec::with_capacity(video.frames.len());
        let mut skipped_frames = 0u32;

        for frame in &video.frames {
            match frame {
                Ok(frame) => frame_hashes.push(difference_hash(&frame.image)),
                Err(e) => {
                    debug!("Skipping frame of {}: {}", video.path.display(), e);
                    skipped_frames += 1;
                }
            }
        }

        if frame_hashes.is_empty() {
            return Err(DecodeError::NoFrames {
                path: video.path.to_string_lossy().into_owned(),
            });
        }

        Ok(Signature {
            frame_hashes,
            skipped_frames,
            duration_secs: video.meta.duration_secs,
            width: video.meta.width,
            height: video.meta.height,
            fps: video.meta.fps,
            file_size,
        })
    }
}
