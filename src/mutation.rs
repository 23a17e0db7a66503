//! Point mutations: one byte per draw, gated by the region field.

use crate::region::RegionField;
use crate::rng::SplitMix64;
use crate::soup::Soup;
use rand::RngCore;

/// Apply `n` sequential point mutations and return how many bytes were written.
///
/// Each draw supplies the replacement byte (low 8 bits) and, from the
/// remaining bits, a soup byte position; the tape is that position shifted
/// down by `log2(tape_len)` and the offset is its low bits. Obstacle regions
/// never mutate. Elsewhere the write is accepted with the region's
/// `mutation_rate`, at the cost of one more draw. Without a region field
/// every draw is accepted.
pub fn mutate(soup: &mut Soup, rng: &mut SplitMix64, regions: Option<&RegionField>, n: usize) -> usize {
    let byte_len = soup.byte_len() as u64;
    let shift = soup.tape_shift();
    let mut written = 0;

    for _ in 0..n {
        let rnd = rng.next_u64();
        let value = rnd as u8;
        let index = ((rnd >> 8) % byte_len) as usize;

        if let Some(field) = regions {
            let region = field.region_of_tape(index >> shift);
            if region.is_obstacle() || !rng.chance(region.mutation_rate as f64) {
                continue;
            }
        }
        soup.as_bytes_mut()[index] = value;
        written += 1;
    }
    written
}
