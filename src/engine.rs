//! The engine: one owned value holding the soup, the RNG, the region field,
//! the batch buffers and the census, and the host-facing operations on them.
//!
//! Fallible operations return `Result` and also record the error in the
//! engine's [`ErrorChannel`], so a host that only polls the flag sees the
//! same failures.

use crate::batch::{Aggregates, Batch, BatchState};
use crate::census::Census;
use crate::config::{EngineConfig, RegionLayout};
use crate::error::{EngineError, ErrorChannel, Result};
use crate::mutation;
use crate::region::{Direction, Region, RegionField, RegionTapes};
use crate::rng::SplitMix64;
use crate::soup::Soup;

pub struct Engine {
    config: EngineConfig,
    soup: Soup,
    rng: SplitMix64,
    regions: Option<RegionField>,
    batch: Batch,
    write_counts: Vec<u32>,
    census: Census,
    errors: ErrorChannel,
}

impl Engine {
    /// Allocate every buffer for `config` and apply its region layout.
    /// The soup starts zeroed; call [`Engine::init`] to seed it.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let warnings = config
            .validate()
            .map_err(|e| EngineError::invalid(e.to_string()))?;
        for warning in warnings {
            log::warn!("{warning}");
        }

        let soup = Soup::new(config.width, config.height, config.tape_len);
        let tape_count = soup.tape_count();
        let mut engine = Self {
            rng: SplitMix64::new(seed_state(config.seed)),
            batch: Batch::new(config.max_pairs, config.tape_len, tape_count),
            write_counts: vec![0; tape_count],
            census: Census::default(),
            errors: ErrorChannel::default(),
            regions: None,
            soup,
            config,
        };
        if let Some(layout) = engine.config.regions.clone() {
            engine.apply_layout(&layout)?;
        }
        Ok(engine)
    }

    fn apply_layout(&mut self, layout: &RegionLayout) -> Result<()> {
        self.configure_regions(layout.grid_size)?;
        for cell in &layout.cells {
            self.set_region(cell.x, cell.y, cell.to_region())?;
        }
        Ok(())
    }

    /// Record `err` in the error channel and log it.
    fn fail(&mut self, err: EngineError) -> EngineError {
        if err.is_fatal() {
            log::error!("{err}");
        } else {
            log::warn!("{err}");
        }
        self.errors.record(&err);
        err
    }

    fn report<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.fail(e))
    }

    fn with_field<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut RegionField) -> Result<T>,
    ) -> Result<T> {
        let result = match self.regions.as_mut() {
            Some(field) => f(field),
            None => Err(EngineError::Unconfigured(op)),
        };
        self.report(result)
    }

    // ---- lifecycle --------------------------------------------------------

    /// Reseed the RNG (the seed is sign-extended to 64 bits) and refill the
    /// soup, one draw per byte. Clears the write counts and drops any
    /// pending batch; the region field is kept.
    pub fn init(&mut self, seed: i32) {
        self.rng.seed(seed_state(seed));
        self.soup.fill(&mut self.rng);
        self.write_counts.fill(0);
        self.batch = Batch::new(
            self.config.max_pairs,
            self.config.tape_len,
            self.soup.tape_count(),
        );
        log::info!(
            "init: seed {seed}, {}x{} tapes of {} bytes",
            self.soup.width(),
            self.soup.height(),
            self.soup.tape_len()
        );
    }

    /// Apply `n` point mutations; returns how many bytes were written.
    pub fn mutate(&mut self, n: i32) -> Result<usize> {
        let Ok(n) = usize::try_from(n) else {
            return Err(self.fail(EngineError::invalid(format!(
                "mutation count {n} is negative"
            ))));
        };
        Ok(mutation::mutate(
            &mut self.soup,
            &mut self.rng,
            self.regions.as_ref(),
            n,
        ))
    }

    /// Build a new batch from the current soup; returns its pair count.
    pub fn prepare_batch(&mut self) -> usize {
        self.batch
            .prepare(&self.soup, &mut self.rng, self.regions.as_ref())
    }

    /// Merge the prepared batch back into the soup; returns its pair count,
    /// or 0 when no batch is pending.
    pub fn absorb_batch(&mut self) -> Result<usize> {
        let result = self.batch.absorb(
            &mut self.soup,
            &mut self.rng,
            self.regions.as_ref(),
            &mut self.write_counts,
        );
        self.report(result)
    }

    /// Recount the byte histogram.
    pub fn update_counts(&mut self) {
        self.census.update(self.soup.as_bytes());
    }

    // ---- fixed configuration ---------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tape_len(&self) -> usize {
        self.soup.tape_len()
    }

    pub fn width(&self) -> usize {
        self.soup.width()
    }

    pub fn height(&self) -> usize {
        self.soup.height()
    }

    pub fn max_pairs(&self) -> usize {
        self.batch.max_pairs()
    }

    pub fn tape_count(&self) -> usize {
        self.soup.tape_count()
    }

    // ---- soup access -----------------------------------------------------

    pub fn read_tape(&mut self, t: usize) -> Result<&[u8]> {
        if let Err(e) = self.soup.tape(t).map(|_| ()) {
            return Err(self.fail(e));
        }
        self.soup.tape(t)
    }

    pub fn write_tape(&mut self, t: usize, bytes: &[u8]) -> Result<()> {
        let result = self.soup.write(t, bytes);
        self.report(result)
    }

    // ---- region field ----------------------------------------------------

    /// Install (or resize to) an `size x size` region field. Every region is
    /// reset to neutral.
    pub fn configure_regions(&mut self, size: usize) -> Result<()> {
        let result = match self.regions.as_mut() {
            Some(field) => field.resize(size),
            None => RegionField::new(size, self.soup.width(), self.soup.height())
                .map(|field| self.regions = Some(field)),
        };
        self.report(result)?;
        log::info!("region field set to {size}x{size}");
        Ok(())
    }

    /// Back to uniform mode.
    pub fn clear_regions(&mut self) {
        if self.regions.take().is_some() {
            log::info!("region field cleared");
        }
    }

    /// Region grid size, 0 when no field is configured.
    pub fn region_grid_size(&self) -> usize {
        self.regions.as_ref().map_or(0, RegionField::size)
    }

    pub fn region_field(&self) -> Option<&RegionField> {
        self.regions.as_ref()
    }

    pub fn region(&mut self, rx: usize, ry: usize) -> Result<Region> {
        self.with_field("region", |f| f.region(rx, ry).copied())
    }

    pub fn set_region(&mut self, rx: usize, ry: usize, region: Region) -> Result<()> {
        self.with_field("set_region", |f| f.set_region(rx, ry, region))
    }

    /// Region id of grid cell `(x, y)`.
    pub fn region_for_cell(&mut self, x: usize, y: usize) -> Result<usize> {
        self.with_field("region_for_cell", |f| f.region_for_cell(x, y))
    }

    pub fn tapes_in_region(&mut self, rx: usize, ry: usize) -> Result<RegionTapes> {
        self.with_field("tapes_in_region", |f| f.tapes_in_region(rx, ry))
    }

    pub fn obstacle(&mut self, rx: usize, ry: usize) -> Result<bool> {
        self.with_field("obstacle", |f| f.region(rx, ry).map(Region::is_obstacle))
    }

    pub fn set_obstacle(&mut self, rx: usize, ry: usize, obstacle: bool) -> Result<()> {
        self.with_field("set_obstacle", |f| f.set_obstacle(rx, ry, obstacle))
    }

    pub fn mutation_rate(&mut self, rx: usize, ry: usize) -> Result<f32> {
        self.with_field("mutation_rate", |f| f.region(rx, ry).map(|r| r.mutation_rate))
    }

    pub fn set_mutation_rate(&mut self, rx: usize, ry: usize, rate: f32) -> Result<()> {
        self.with_field("set_mutation_rate", |f| f.set_mutation_rate(rx, ry, rate))
    }

    pub fn temperature(&mut self, rx: usize, ry: usize) -> Result<f32> {
        self.with_field("temperature", |f| f.region(rx, ry).map(|r| r.temperature))
    }

    pub fn set_temperature(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        self.with_field("set_temperature", |f| f.set_temperature(rx, ry, value))
    }

    pub fn energy(&mut self, rx: usize, ry: usize) -> Result<f32> {
        self.with_field("energy", |f| f.region(rx, ry).map(|r| r.energy))
    }

    pub fn set_energy(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        self.with_field("set_energy", |f| f.set_energy(rx, ry, value))
    }

    pub fn randomness(&mut self, rx: usize, ry: usize) -> Result<f32> {
        self.with_field("randomness", |f| f.region(rx, ry).map(|r| r.randomness_factor))
    }

    pub fn set_randomness(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        self.with_field("set_randomness", |f| f.set_randomness(rx, ry, value))
    }

    /// Influence toward `direction` (0 north, 1 east, 2 south, 3 west).
    pub fn directional_influence(&mut self, rx: usize, ry: usize, direction: usize) -> Result<f32> {
        let dir = self.direction(direction)?;
        self.with_field("directional_influence", |f| {
            f.region(rx, ry).map(|r| r.influence(dir))
        })
    }

    pub fn set_directional_influence(
        &mut self,
        rx: usize,
        ry: usize,
        direction: usize,
        value: f32,
    ) -> Result<()> {
        let dir = self.direction(direction)?;
        self.with_field("set_directional_influence", |f| {
            f.set_directional_influence(rx, ry, dir, value)
        })
    }

    fn direction(&mut self, index: usize) -> Result<Direction> {
        match Direction::from_index(index) {
            Some(dir) => Ok(dir),
            None => Err(self.fail(EngineError::invalid(format!(
                "direction {index} (expected 0..4)"
            )))),
        }
    }

    // ---- error channel ---------------------------------------------------

    pub fn has_error(&self) -> bool {
        self.errors.has_error()
    }

    pub fn last_error(&self) -> &str {
        self.errors.last_error()
    }

    pub fn clear_error(&mut self) {
        self.errors.clear();
    }

    // ---- raw buffers -----------------------------------------------------

    pub fn soup(&self) -> &[u8] {
        self.soup.as_bytes()
    }

    pub fn census(&self) -> &Census {
        &self.census
    }

    /// Byte histogram as of the last [`Engine::update_counts`].
    pub fn histogram(&self) -> &[u64; 256] {
        self.census.counts()
    }

    /// Per-tape host write count, taken from the slot counters at absorb.
    pub fn write_counts(&self) -> &[u32] {
        &self.write_counts
    }

    pub fn total_writes(&self) -> u64 {
        self.write_counts.iter().map(|&c| c as u64).sum()
    }

    /// Soup bytes overwritten by the last absorb.
    pub fn committed_bytes(&self) -> usize {
        self.batch.committed_bytes()
    }

    pub fn batch_state(&self) -> BatchState {
        self.batch.state()
    }

    pub fn pair_count(&self) -> usize {
        self.batch.pair_count()
    }

    pub fn aggregates(&self) -> Aggregates {
        self.batch.aggregates()
    }

    pub fn pair_indices(&self) -> &[u32] {
        self.batch.pair_indices()
    }

    pub fn pair_indices_mut(&mut self) -> &mut [u32] {
        self.batch.pair_indices_mut()
    }

    pub fn payload(&self) -> &[u8] {
        self.batch.payload()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.batch.payload_mut()
    }

    pub fn slot_write_counts(&self) -> &[u32] {
        self.batch.slot_write_counts()
    }

    pub fn slot_write_counts_mut(&mut self) -> &mut [u32] {
        self.batch.slot_write_counts_mut()
    }

    pub fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    /// Region attribute table as raw bytes, empty in uniform mode.
    pub fn region_table(&self) -> &[u8] {
        self.regions
            .as_ref()
            .map(RegionField::table_bytes)
            .unwrap_or_default()
    }

    /// Region id per tape, empty in uniform mode.
    pub fn cell_map(&self) -> &[u32] {
        self.regions
            .as_ref()
            .map(RegionField::cell_map)
            .unwrap_or_default()
    }
}

fn seed_state(seed: i32) -> u64 {
    seed as i64 as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionCell;

    fn small_config() -> EngineConfig {
        EngineConfig {
            width: 16,
            height: 16,
            tape_len: 4,
            max_pairs: 64,
            seed: 42,
            regions: None,
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig { tape_len: 3, ..small_config() };
        assert!(matches!(Engine::new(config), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn test_init_fills_soup_from_sign_extended_seed() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.init(-1);

        let mut rng = SplitMix64::new(u64::MAX);
        let mut expected = Soup::new(16, 16, 4);
        expected.fill(&mut rng);
        assert_eq!(engine.soup(), expected.as_bytes());
        assert_eq!(engine.rng_state(), rng.state());
        assert_eq!(engine.soup().len(), 16 * 16 * 4);
    }

    #[test]
    fn test_oversized_max_pairs_is_capped_not_allocated() {
        let config = EngineConfig {
            width: 4,
            height: 4,
            tape_len: 2,
            max_pairs: usize::MAX / 2,
            ..small_config()
        };
        let mut engine = Engine::new(config).unwrap();
        assert_eq!(engine.max_pairs(), 8);
        engine.init(42);
        assert!(engine.prepare_batch() <= 8);
        assert!(engine.absorb_batch().is_ok());
    }

    #[test]
    fn test_negative_mutation_count_is_reported() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.init(1);
        let state = engine.rng_state();
        assert!(engine.mutate(-5).is_err());
        assert!(engine.has_error());
        assert!(engine.last_error().contains("-5"));
        assert_eq!(engine.rng_state(), state);

        engine.clear_error();
        assert!(!engine.has_error());
        assert_eq!(engine.last_error(), "");
        assert_eq!(engine.mutate(10), Ok(10));
    }

    #[test]
    fn test_region_calls_without_field_are_unconfigured() {
        let mut engine = Engine::new(small_config()).unwrap();
        assert_eq!(engine.region_grid_size(), 0);
        assert_eq!(
            engine.set_obstacle(0, 0, true),
            Err(EngineError::Unconfigured("set_obstacle"))
        );
        assert!(engine.has_error());
        assert!(engine.region_table().is_empty());
        assert!(engine.cell_map().is_empty());
    }

    #[test]
    fn test_region_setters_and_getters() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.configure_regions(4).unwrap();
        assert_eq!(engine.region_grid_size(), 4);
        assert_eq!(engine.region_table().len(), 16 * 36);
        assert_eq!(engine.cell_map().len(), 256);

        engine.set_mutation_rate(1, 2, 0.5).unwrap();
        engine.set_temperature(1, 2, 2.0).unwrap();
        engine.set_energy(1, 2, 0.25).unwrap();
        engine.set_randomness(1, 2, 0.1).unwrap();
        engine.set_directional_influence(1, 2, 3, -0.5).unwrap();
        engine.set_obstacle(1, 2, true).unwrap();

        assert_eq!(engine.mutation_rate(1, 2), Ok(0.5));
        assert_eq!(engine.temperature(1, 2), Ok(2.0));
        assert_eq!(engine.energy(1, 2), Ok(0.25));
        assert_eq!(engine.randomness(1, 2), Ok(0.1));
        assert_eq!(engine.directional_influence(1, 2, 3), Ok(-0.5));
        assert_eq!(engine.obstacle(1, 2), Ok(true));
        assert!(!engine.has_error());

        assert_eq!(engine.region_for_cell(4, 8), Ok(2 * 4 + 1));
        assert_eq!(engine.tapes_in_region(1, 2).unwrap().len(), 16);
    }

    #[test]
    fn test_invalid_region_input_leaves_field_unchanged() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.configure_regions(8).unwrap();

        assert!(engine.set_mutation_rate(0, 0, 1.5).is_err());
        assert!(engine.last_error().contains("mutation_rate"));
        assert_eq!(engine.mutation_rate(0, 0), Ok(1.0));

        engine.clear_error();
        assert!(engine.set_directional_influence(0, 0, 4, 1.0).is_err());
        assert!(engine.has_error());
        assert!(engine.directional_influence(0, 0, 7).is_err());

        engine.clear_error();
        assert!(engine.set_temperature(8, 0, 2.0).is_err());
        assert!(engine.configure_regions(5).is_err());
        assert_eq!(engine.region_grid_size(), 8);
    }

    #[test]
    fn test_resize_and_clear_regions() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.configure_regions(4).unwrap();
        engine.set_obstacle(0, 0, true).unwrap();
        engine.configure_regions(16).unwrap();
        assert_eq!(engine.obstacle(0, 0), Ok(false));
        assert_eq!(engine.cell_map()[255], 255);

        engine.clear_regions();
        assert_eq!(engine.region_grid_size(), 0);
        assert!(engine.region_field().is_none());
    }

    #[test]
    fn test_layout_from_config_is_applied() {
        let config = EngineConfig {
            regions: Some(RegionLayout {
                grid_size: 4,
                cells: vec![RegionCell {
                    x: 3,
                    y: 1,
                    obstacle: Some(true),
                    energy: Some(0.5),
                    ..Default::default()
                }],
            }),
            ..small_config()
        };
        let mut engine = Engine::new(config).unwrap();
        assert_eq!(engine.region_grid_size(), 4);
        assert_eq!(engine.obstacle(3, 1), Ok(true));
        assert_eq!(engine.energy(3, 1), Ok(0.5));
        assert_eq!(engine.energy(0, 0), Ok(1.0));
    }

    #[test]
    fn test_corrupted_pair_list_is_reported_and_discarded() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.init(9);
        assert!(engine.prepare_batch() > 0);
        engine.pair_indices_mut()[0] = 10_000;
        let before = engine.soup().to_vec();

        let err = engine.absorb_batch().unwrap_err();
        assert!(err.is_fatal());
        assert!(engine.has_error());
        assert_eq!(engine.soup(), before.as_slice());
        assert_eq!(engine.batch_state(), BatchState::Empty);
        assert_eq!(engine.absorb_batch(), Ok(0));
    }

    #[test]
    fn test_tape_access_and_write_counts() {
        let mut engine = Engine::new(small_config()).unwrap();
        engine.init(3);
        engine.write_tape(5, &[1, 2, 3, 4]).unwrap();
        assert_eq!(engine.read_tape(5).unwrap(), &[1, 2, 3, 4]);
        assert!(engine.read_tape(256).is_err());
        assert!(engine.write_tape(0, &[1, 2]).is_err());
        engine.clear_error();

        let n = engine.prepare_batch();
        engine.slot_write_counts_mut()[1] = 7;
        let partner = engine.pair_indices()[1] as usize;
        assert_eq!(engine.absorb_batch(), Ok(n));
        assert_eq!(engine.write_counts()[partner], 7);
        assert_eq!(engine.total_writes(), 7);
        assert_eq!(engine.committed_bytes(), n * 2 * 4);

        engine.update_counts();
        assert_eq!(engine.census().total(), 16 * 16 * 4);
        assert_eq!(engine.histogram().iter().sum::<u64>(), 1024);

        engine.init(3);
        assert_eq!(engine.total_writes(), 0);
    }
}
