use crate::hasher::{hamming_distance, HASH_BITS};
use crate::model::Signature;

/// Similarity of two signatures in `[0, 1]`.
///
/// Equal-length signatures are compared frame by frame. Otherwise the longer
/// one is resampled onto the shorter one with `j = floor(i * long / short)`,
/// so both ends of the timeline still line up. The score is one minus the
/// mean Hamming distance of aligned pairs over 64.
pub fn similarity(a: &Signature, b: &Signature) -> f64 {
    frame_similarity(&a.frame_hashes, &b.frame_hashes)
}

pub fn frame_similarity(a: &[u64], b: &[u64]) -> f64 {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0.0;
    }

    let total: u64 = short
        .iter()
        .enumerate()
        .map(|(i, &hash)| {
            let j = i * long.len() / short.len();
            hamming_distance(hash, long[j]) as u64
        })
        .sum();

    let mean = total as f64 / short.len() as f64;
    (1.0 - mean / HASH_BITS as f64).clamp(0.0, 1.0)
}
