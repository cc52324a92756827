use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Luma grid is one column wider than the hash so every hash bit has a
/// right-hand neighbour to compare against.
pub const GRID_WIDTH: u32 = 9;
pub const GRID_HEIGHT: u32 = 8;
pub const HASH_BITS: u32 = 64;

/// 64-bit difference hash of one frame.
///
/// The frame is converted to 8-bit luma and reduced to a 9×8 grid. Bit
/// `row * 8 + col` (counted from the most significant end) is set when
/// `grid[row][col]` is strictly brighter than `grid[row][col + 1]`.
pub fn difference_hash(frame: &RgbImage) -> u64 {
    let luma: GrayImage = imageops::grayscale(frame);
    let grid = imageops::resize(&luma, GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle);
    hash_grid(&grid)
}

pub(crate) fn hash_grid(grid: &GrayImage) -> u64 {
    let mut hash = 0u64;
    for y in 0..GRID_HEIGHT {
        for x in 0..GRID_WIDTH - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            hash <<= 1;
            if left > right {
                hash |= 1;
            }
        }
    }
    hash
}

#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
