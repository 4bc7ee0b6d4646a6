//! Sample payload generation.
//!
//! When no payload file is given, the payload scenario packs a generated
//! greyscale "image" instead: rows of 8-bit pixels with a mix of smooth and
//! noisy regions, so the flit stream contains runs as well as arbitrary bit
//! patterns.
//!
//! # Design
//!
//! Generated rows are one of:
//! - flat (every pixel the same value)
//! - gradient (value rises along the row)
//! - noise (random bytes)

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;

/// Pixels per generated row.
const ROW_WIDTH: usize = 64;

/// `len` bytes of sample pixel rows, reproducible from `seed`.
pub fn sample_pixels(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut pixels = Vec::with_capacity(len);

    while pixels.len() < len {
        let row = ROW_WIDTH.min(len - pixels.len());

        match rng.gen_range(0..10u8) {
            // 30% flat
            0..=2 => {
                let value: u8 = rng.gen();
                pixels.extend(std::iter::repeat(value).take(row));
            }

            // 50% gradient
            3..=7 => {
                let start: u8 = rng.gen();
                let step: u8 = rng.gen_range(1..=4);
                pixels.extend((0..row).map(|i| start.wrapping_add(step.wrapping_mul(i as u8))));
            }

            // 20% noise
            _ => pixels.extend((0..row).map(|_| rng.gen::<u8>())),
        }
    }

    pixels
}

/// Read a payload file, or generate a sample when `path` is `None`.
pub fn load_payload(path: Option<&Path>, seed: u64, size_bytes: usize) -> std::io::Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path),
        None => Ok(sample_pixels(seed, size_bytes)),
    }
}
