//! Two-phase pairing and exchange.
//!
//! `prepare` draws a collision-free matching of grid neighbours and snapshots
//! both tapes of every pair into the payload. The host may then work on the
//! payload (run programs over it, record how many bytes each slot wrote)
//! before `absorb` merges it back into the soup byte by byte with the
//! batch's transfer probability.
//!
//! Slot `2k` holds the source tape of pair `k`, slot `2k + 1` its partner.
//! All buffers are allocated once for `max_pairs` pairs and reused.

use crate::error::{EngineError, Result};
use crate::region::{Direction, RegionField};
use crate::rng::SplitMix64;
use crate::soup::Soup;
use rand::RngCore;

/// Consecutive failed draws after which `prepare` stops looking for pairs.
pub const MAX_COLLISIONS: u32 = 16;

/// Lifecycle of the batch buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchState {
    #[default]
    Empty,
    Prepared,
    Absorbed,
}

/// Environmental aggregates over the source regions of a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aggregates {
    /// Geometric mean of source-region temperature.
    pub temperature: f64,
    /// Geometric mean of source-region energy.
    pub energy: f64,
    /// Arithmetic mean of source-region randomness factor.
    pub randomness: f64,
}

impl Aggregates {
    pub const NEUTRAL: Aggregates = Aggregates {
        temperature: 1.0,
        energy: 1.0,
        randomness: 0.0,
    };

    /// Per-byte chance that an absorbed byte overwrites the soup.
    pub fn transfer_probability(&self) -> f64 {
        (self.temperature * self.energy).clamp(0.0, 1.0)
    }

    fn over_sources(sources: impl Iterator<Item = usize>, regions: Option<&RegionField>) -> Self {
        let Some(field) = regions else {
            return Self::NEUTRAL;
        };
        let mut n = 0usize;
        let (mut ln_t, mut ln_e, mut randomness) = (0.0f64, 0.0f64, 0.0f64);
        for t in sources {
            let region = field.region_of_tape(t);
            ln_t += (region.temperature as f64).ln();
            ln_e += (region.energy as f64).ln();
            randomness += region.randomness_factor as f64;
            n += 1;
        }
        if n == 0 {
            return Self::NEUTRAL;
        }
        let n = n as f64;
        Self {
            temperature: (ln_t / n).exp(),
            energy: (ln_e / n).exp(),
            randomness: randomness / n,
        }
    }
}

impl Default for Aggregates {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Preallocated pairing/exchange buffers.
#[derive(Clone, Debug)]
pub struct Batch {
    max_pairs: usize,
    tape_len: usize,
    mask: Vec<bool>,
    /// Flat `[source, partner]` tape indices, two slots per pair.
    pairs: Vec<u32>,
    pair_count: usize,
    payload: Vec<u8>,
    slot_writes: Vec<u32>,
    committed: usize,
    aggregates: Aggregates,
    state: BatchState,
}

impl Batch {
    /// Buffers for at most `max_pairs` pairs. A matching over `tape_count`
    /// tapes never holds more than `tape_count / 2` pairs, so the cap is
    /// lowered to that.
    pub fn new(max_pairs: usize, tape_len: usize, tape_count: usize) -> Self {
        let max_pairs = max_pairs.min(tape_count / 2);
        Self {
            max_pairs,
            tape_len,
            mask: vec![false; tape_count],
            pairs: vec![0; max_pairs * 2],
            pair_count: 0,
            payload: vec![0; max_pairs * 2 * tape_len],
            slot_writes: vec![0; max_pairs * 2],
            committed: 0,
            aggregates: Aggregates::NEUTRAL,
            state: BatchState::Empty,
        }
    }

    /// Effective pair capacity.
    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    pub fn pair_count(&self) -> usize {
        self.pair_count
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn aggregates(&self) -> Aggregates {
        self.aggregates
    }

    /// Flat pair list of the current batch, `2 * pair_count` tape indices.
    pub fn pair_indices(&self) -> &[u32] {
        &self.pairs[..self.pair_count * 2]
    }

    /// Pair list as the host sees it between prepare and absorb. Indices
    /// written here are checked again by `absorb`.
    pub fn pair_indices_mut(&mut self) -> &mut [u32] {
        let len = self.pair_count * 2;
        &mut self.pairs[..len]
    }

    /// `(source, partner)` tape indices of the current batch.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pair_indices()
            .chunks_exact(2)
            .map(|p| (p[0] as usize, p[1] as usize))
    }

    /// Snapshot bytes, `2 * pair_count * tape_len` of them, in slot order.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.pair_count * 2 * self.tape_len]
    }

    /// Payload of the current batch, for host-side processing before absorb.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.pair_count * 2 * self.tape_len;
        &mut self.payload[..len]
    }

    /// Bytes of slot `slot` in the payload.
    pub fn slot(&self, slot: usize) -> &[u8] {
        &self.payload()[slot * self.tape_len..(slot + 1) * self.tape_len]
    }

    pub fn slot_write_counts(&self) -> &[u32] {
        &self.slot_writes[..self.pair_count * 2]
    }

    /// Soup bytes overwritten by the last absorb.
    pub fn committed_bytes(&self) -> usize {
        self.committed
    }

    /// Per-slot write counters the host may fill in before absorb. Absorb
    /// copies each into `write_counts` for the slot's tape.
    pub fn slot_write_counts_mut(&mut self) -> &mut [u32] {
        let len = self.pair_count * 2;
        &mut self.slot_writes[..len]
    }

    /// Build a new matching and payload from the current soup.
    pub fn prepare(
        &mut self,
        soup: &Soup,
        rng: &mut SplitMix64,
        regions: Option<&RegionField>,
    ) -> usize {
        let tape_count = soup.tape_count();
        let (width, height) = (soup.width(), soup.height());
        let len = self.tape_len;
        let shift = soup.tape_shift();
        let bytes = soup.as_bytes();

        self.mask.fill(false);
        self.pair_count = 0;
        self.committed = 0;
        self.state = BatchState::Empty;
        let mut collisions = 0u32;

        while self.pair_count < self.max_pairs && collisions < MAX_COLLISIONS {
            let rnd = rng.next_u64();
            let mut dir: isize = if rnd & 1 == 1 { 1 } else { -1 };
            let horizontal = (rnd >> 1) & 1 == 1;
            let i = ((rnd >> 2) % tape_count as u64) as usize;

            if self.mask[i] {
                collisions += 1;
                continue;
            }
            let region = regions.map(|field| field.region_of_tape(i));
            if region.is_some_and(|r| r.is_obstacle()) {
                collisions += 1;
                continue;
            }

            if let Some(r) = region {
                let bias = if horizontal {
                    r.influence(Direction::East) - r.influence(Direction::West)
                } else {
                    r.influence(Direction::South) - r.influence(Direction::North)
                };
                if bias != 0.0 && rng.chance(bias.abs() as f64) {
                    dir = if bias > 0.0 { 1 } else { -1 };
                }
            }

            let (x, y) = soup.coords(i);
            let (pos, extent, stride) = if horizontal {
                (x, width, 1)
            } else {
                (y, height, width)
            };
            if pos == 0 {
                dir = 1;
            }
            if pos + 1 == extent {
                dir = -1;
            }

            let partner = [dir, -dir].into_iter().find_map(|d| {
                let p = pos as isize + d;
                if p < 0 || p >= extent as isize {
                    return None;
                }
                let j = if d > 0 { i + stride } else { i - stride };
                let blocked = self.mask[j]
                    || regions.is_some_and(|field| field.region_of_tape(j).is_obstacle());
                (!blocked).then_some(j)
            });
            let Some(j) = partner else {
                collisions += 1;
                continue;
            };

            self.mask[i] = true;
            self.mask[j] = true;
            let slot = self.pair_count * 2;
            self.pairs[slot] = i as u32;
            self.pairs[slot + 1] = j as u32;
            let base = slot * len;
            self.payload[base..base + len].copy_from_slice(&bytes[i << shift..(i << shift) + len]);
            self.payload[base + len..base + 2 * len]
                .copy_from_slice(&bytes[j << shift..(j << shift) + len]);
            self.slot_writes[slot] = 0;
            self.slot_writes[slot + 1] = 0;
            self.pair_count += 1;
            collisions = 0;

            if let Some(r) = region {
                if r.randomness_factor != 0.0 && rng.chance(r.randomness_factor as f64) {
                    self.payload[base + 2 * len - 1] = rng.next_byte();
                }
            }
        }

        self.aggregates = Aggregates::over_sources(self.sources(), regions);
        self.state = BatchState::Prepared;
        log::debug!(
            "prepared batch: {} pairs, temperature {:.4}, energy {:.4}, randomness {:.4}",
            self.pair_count,
            self.aggregates.temperature,
            self.aggregates.energy,
            self.aggregates.randomness
        );
        self.pair_count
    }

    fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.pair_indices().iter().step_by(2).map(|&t| t as usize)
    }

    /// Commit the prepared batch into the soup and return its pair count.
    ///
    /// A batch that is not in the `Prepared` state commits nothing and
    /// returns 0. Every tape index is checked before the first byte is
    /// written; an index outside the soup is a [`EngineError::ProtocolViolation`]
    /// and discards the batch.
    ///
    /// `write_counts[t]` of every paired tape is set to its slot's counter;
    /// other tapes keep their previous count.
    pub fn absorb(
        &mut self,
        soup: &mut Soup,
        rng: &mut SplitMix64,
        regions: Option<&RegionField>,
        write_counts: &mut [u32],
    ) -> Result<usize> {
        if self.state != BatchState::Prepared {
            return Ok(0);
        }

        let tape_count = soup.tape_count();
        let corrupt = self
            .pair_indices()
            .iter()
            .enumerate()
            .find(|&(_, &t)| t as usize >= tape_count || t as usize >= write_counts.len());
        if let Some((slot, &t)) = corrupt {
            self.state = BatchState::Empty;
            return Err(EngineError::ProtocolViolation {
                slot,
                index: t as usize,
                tape_count,
            });
        }

        let aggregates = Aggregates::over_sources(self.sources(), regions);
        let p = aggregates.transfer_probability();
        let len = self.tape_len;
        let shift = soup.tape_shift();
        let bytes = soup.as_bytes_mut();

        for slot in 0..self.pair_count * 2 {
            let t = self.pairs[slot] as usize;
            let src = &self.payload[slot * len..(slot + 1) * len];
            let dst = &mut bytes[t << shift..(t << shift) + len];
            for (d, &s) in dst.iter_mut().zip(src) {
                if rng.chance(p) {
                    *d = s;
                    self.committed += 1;
                }
            }
            write_counts[t] = self.slot_writes[slot];
        }

        self.aggregates = aggregates;
        self.state = BatchState::Absorbed;
        log::debug!(
            "absorbed batch: {} pairs, transfer probability {:.4}, {} bytes committed",
            self.pair_count,
            p,
            self.committed
        );
        Ok(self.pair_count)
    }
}
