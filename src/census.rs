//! Byte census over the soup and a few statistics derived from it.
//!
//! Read-only with respect to the soup. The histogram is built with a
//! parallel fold; addition commutes so the result does not depend on
//! scheduling.

use rayon::prelude::*;

const CHUNK: usize = 64 * 1024;

/// 256-bucket byte histogram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Census {
    counts: [u64; 256],
}

impl Default for Census {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl Census {
    /// Recount every byte of `soup`.
    pub fn update(&mut self, soup: &[u8]) {
        self.counts = soup
            .par_chunks(CHUNK)
            .fold(
                || [0u64; 256],
                |mut acc, chunk| {
                    for &b in chunk {
                        acc[b as usize] += 1;
                    }
                    acc
                },
            )
            .reduce(
                || [0u64; 256],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b.iter()) {
                        *x += y;
                    }
                    a
                },
            );
    }

    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of byte values that occur at least once.
    pub fn unique_bytes(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// Zero-order Shannon entropy in bits per byte.
    pub fn entropy(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let mut h0 = 0.0;
        for &count in &self.counts {
            if count > 0 {
                let p = count as f64 / total;
                h0 -= p * p.log2();
            }
        }
        h0
    }

    /// The `n` most common bytes, most frequent first, ties by byte value.
    pub fn top(&self, n: usize) -> Vec<(u8, u64)> {
        let mut sorted: Vec<(u8, u64)> = self
            .counts
            .iter()
            .enumerate()
            .map(|(b, &c)| (b as u8, c))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        sorted.truncate(n);
        sorted
    }
}

/// Brotli compression ratio (original / compressed) of `data`.
/// Repetitive soups compress better, so the ratio rises as replicators spread.
pub fn compression_ratio(data: &[u8]) -> f64 {
    use brotli::enc::BrotliEncoderParams;

    if data.is_empty() {
        return 1.0;
    }
    let mut compressed = Vec::new();
    let mut params = BrotliEncoderParams::default();
    params.quality = 4;
    match brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut compressed, &params) {
        Ok(_) if !compressed.is_empty() => data.len() as f64 / compressed.len() as f64,
        _ => 1.0,
    }
}
