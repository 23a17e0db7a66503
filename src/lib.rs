//! A grid "soup" of fixed-length byte tapes under a region overlay.
//!
//! Neighbouring tapes are paired in batches and exchange content through a
//! two-phase protocol (`prepare_batch` snapshots the pairs, `absorb_batch`
//! merges them back), while sparse point mutations inject noise. An optional
//! `R x R` region field biases all of it: obstacles, mutation rates,
//! temperature and energy, payload randomness and directional pairing bias.
//!
//! Everything is driven by one SplitMix64 stream, so a run is reproducible
//! from its seed and call sequence.

pub mod batch;
pub mod census;
pub mod config;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod region;
pub mod rng;
pub mod soup;

pub use batch::{Aggregates, BatchState, MAX_COLLISIONS};
pub use census::{compression_ratio, Census};
pub use config::{Config, ConfigError, EngineConfig, RegionCell, RegionLayout, RunConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use region::{Direction, Region, RegionField, REGION_GRID_SIZES};
pub use rng::SplitMix64;
