//! Region field: an `R x R` overlay of environmental modifiers on the soup.
//!
//! Every tape maps to exactly one region through a precomputed cell map.
//! A region can block a tape from mutating and pairing (`is_obstacle`), gate
//! point mutations (`mutation_rate`), bias the pairing direction
//! (`directional_influence`), inject noise into batch payloads
//! (`randomness_factor`) and scale how strongly an absorbed batch overwrites
//! the soup (`temperature`, `energy`).
//!
//! The attribute table is plain-old-data so a host can read it as raw bytes.

use bytemuck::{Pod, Zeroable};

use crate::error::{EngineError, Result};

/// Allowed region grid sizes.
pub const REGION_GRID_SIZES: [usize; 3] = [4, 8, 16];

/// Pairing directions, in the order of `Region::directional_influence`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Environmental attributes of one region.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Region {
    /// Acceptance probability of a point mutation, `[0, 1]`.
    pub mutation_rate: f32,
    /// Positive; geometric-mean aggregated per batch.
    pub temperature: f32,
    /// Positive; geometric-mean aggregated per batch.
    pub energy: f32,
    /// Chance that a pair sourced here gets its last payload byte randomized.
    pub randomness_factor: f32,
    /// Indexed by [`Direction`].
    pub directional_influence: [f32; 4],
    is_obstacle: u8,
    _padding: [u8; 3],
}

impl Default for Region {
    fn default() -> Self {
        Self::neutral()
    }
}

impl Region {
    /// Region with no effect on the soup.
    pub const fn neutral() -> Self {
        Self {
            mutation_rate: 1.0,
            temperature: 1.0,
            energy: 1.0,
            randomness_factor: 0.0,
            directional_influence: [0.0; 4],
            is_obstacle: 0,
            _padding: [0; 3],
        }
    }

    #[inline]
    pub fn is_obstacle(&self) -> bool {
        self.is_obstacle != 0
    }

    pub fn set_obstacle(&mut self, obstacle: bool) {
        self.is_obstacle = obstacle as u8;
    }

    #[inline]
    pub fn influence(&self, dir: Direction) -> f32 {
        self.directional_influence[dir.index()]
    }

    /// Check every attribute against its domain.
    pub fn validate(&self) -> Result<()> {
        check_unit("mutation_rate", self.mutation_rate)?;
        check_unit("randomness_factor", self.randomness_factor)?;
        check_positive("temperature", self.temperature)?;
        check_positive("energy", self.energy)?;
        for &v in &self.directional_influence {
            check_finite("directional_influence", v)?;
        }
        Ok(())
    }
}

fn check_unit(name: &str, v: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(EngineError::invalid(format!("{name} {v} outside [0, 1]")))
    }
}

fn check_positive(name: &str, v: f32) -> Result<f32> {
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(EngineError::invalid(format!("{name} {v} must be finite and > 0")))
    }
}

fn check_finite(name: &str, v: f32) -> Result<f32> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EngineError::invalid(format!("{name} {v} must be finite")))
    }
}

/// Region grid over a `width x height` soup.
#[derive(Clone, Debug)]
pub struct RegionField {
    size: usize,
    width: usize,
    height: usize,
    regions: Vec<Region>,
    /// Region id per tape, row-major like the soup.
    cell_map: Vec<u32>,
}

impl RegionField {
    /// Neutral `size x size` field over a `width x height` soup.
    pub fn new(size: usize, width: usize, height: usize) -> Result<Self> {
        let mut field = Self {
            size: 0,
            width,
            height,
            regions: Vec::new(),
            cell_map: vec![0; width * height],
        };
        field.resize(size)?;
        Ok(field)
    }

    /// Change the grid size, reset every region to neutral and rebuild the cell map.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        if !REGION_GRID_SIZES.contains(&size) {
            return Err(EngineError::invalid(format!(
                "region grid size {size} (expected 4, 8 or 16)"
            )));
        }
        self.size = size;
        self.regions.clear();
        self.regions.resize(size * size, Region::neutral());
        for y in 0..self.height {
            let ry = y * size / self.height;
            for x in 0..self.width {
                let rx = x * size / self.width;
                self.cell_map[y * self.width + x] = (ry * size + rx) as u32;
            }
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region of tape `t`. Hot path; `t` must be a valid tape index.
    #[inline]
    pub fn region_of_tape(&self, t: usize) -> &Region {
        &self.regions[self.cell_map[t] as usize]
    }

    /// Region id of grid cell `(x, y)`.
    pub fn region_for_cell(&self, x: usize, y: usize) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(EngineError::OutOfRange {
                what: "cell",
                index: y.saturating_mul(self.width).saturating_add(x),
                len: self.width * self.height,
            });
        }
        Ok(self.cell_map[y * self.width + x] as usize)
    }

    fn id(&self, rx: usize, ry: usize) -> Result<usize> {
        if rx >= self.size || ry >= self.size {
            return Err(EngineError::invalid(format!(
                "region ({rx}, {ry}) outside {0}x{0} grid",
                self.size
            )));
        }
        Ok(ry * self.size + rx)
    }

    pub fn region(&self, rx: usize, ry: usize) -> Result<&Region> {
        let id = self.id(rx, ry)?;
        Ok(&self.regions[id])
    }

    /// Replace a whole region record after validating it.
    pub fn set_region(&mut self, rx: usize, ry: usize, region: Region) -> Result<()> {
        let id = self.id(rx, ry)?;
        region.validate()?;
        self.regions[id] = region;
        Ok(())
    }

    fn update(&mut self, rx: usize, ry: usize, f: impl FnOnce(&mut Region)) -> Result<()> {
        let id = self.id(rx, ry)?;
        f(&mut self.regions[id]);
        Ok(())
    }

    pub fn set_obstacle(&mut self, rx: usize, ry: usize, obstacle: bool) -> Result<()> {
        self.update(rx, ry, |r| r.set_obstacle(obstacle))
    }

    pub fn set_mutation_rate(&mut self, rx: usize, ry: usize, rate: f32) -> Result<()> {
        let rate = check_unit("mutation_rate", rate)?;
        self.update(rx, ry, |r| r.mutation_rate = rate)
    }

    pub fn set_temperature(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        let value = check_positive("temperature", value)?;
        self.update(rx, ry, |r| r.temperature = value)
    }

    pub fn set_energy(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        let value = check_positive("energy", value)?;
        self.update(rx, ry, |r| r.energy = value)
    }

    pub fn set_randomness(&mut self, rx: usize, ry: usize, value: f32) -> Result<()> {
        let value = check_unit("randomness_factor", value)?;
        self.update(rx, ry, |r| r.randomness_factor = value)
    }

    pub fn set_directional_influence(
        &mut self,
        rx: usize,
        ry: usize,
        dir: Direction,
        value: f32,
    ) -> Result<()> {
        let value = check_finite("directional_influence", value)?;
        self.update(rx, ry, |r| r.directional_influence[dir.index()] = value)
    }

    /// Attribute table as raw bytes, row-major by region id.
    pub fn table_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.regions)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region id per tape.
    pub fn cell_map(&self) -> &[u32] {
        &self.cell_map
    }

    /// Tape indices covered by region `(rx, ry)`, row-major.
    pub fn tapes_in_region(&self, rx: usize, ry: usize) -> Result<RegionTapes> {
        self.id(rx, ry)?;
        let span = |r: usize, extent: usize| {
            let lo = (r * extent + self.size - 1) / self.size;
            let hi = ((r + 1) * extent + self.size - 1) / self.size;
            (lo, hi)
        };
        let (x0, x1) = span(rx, self.width);
        let (y0, y1) = span(ry, self.height);
        Ok(RegionTapes {
            width: self.width,
            x0,
            x1,
            y0,
            y1,
            x: x0,
            y: y0,
        })
    }
}

/// Finite iterator over one region's tapes. Clone it (or call
/// [`RegionTapes::restart`]) to walk the region again.
#[derive(Clone, Debug)]
pub struct RegionTapes {
    width: usize,
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    x: usize,
    y: usize,
}

impl RegionTapes {
    pub fn restart(&mut self) {
        self.x = self.x0;
        self.y = self.y0;
    }
}

impl Iterator for RegionTapes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.x0 >= self.x1 || self.y >= self.y1 {
            return None;
        }
        let t = self.y * self.width + self.x;
        self.x += 1;
        if self.x == self.x1 {
            self.x = self.x0;
            self.y += 1;
        }
        Some(t)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.x0 >= self.x1 || self.y >= self.y1 {
            0
        } else {
            (self.y1 - self.y) * (self.x1 - self.x0) - (self.x - self.x0)
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RegionTapes {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_record_is_36_bytes() {
        assert_eq!(std::mem::size_of::<Region>(), 36);
        let field = RegionField::new(4, 8, 8).unwrap();
        assert_eq!(field.table_bytes().len(), 16 * 36);
    }

    #[test]
    fn test_mapping_matches_floor_division() {
        let field = RegionField::new(8, 200, 200).unwrap();
        assert_eq!(field.region_for_cell(0, 0).unwrap(), 0);
        assert_eq!(field.region_for_cell(100, 100).unwrap(), 4 * 8 + 4);
        assert_eq!(field.region_for_cell(199, 199).unwrap(), 63);
        assert_eq!(field.region_for_cell(24, 0).unwrap(), 0);
        assert_eq!(field.region_for_cell(25, 0).unwrap(), 1);
        assert!(field.region_for_cell(200, 0).is_err());
    }

    #[test]
    fn test_mapping_uneven_grid() {
        // 10 / 4 = 2.5 cells per region
        let field = RegionField::new(4, 10, 10).unwrap();
        let rx: Vec<usize> = (0..10).map(|x| field.region_for_cell(x, 0).unwrap()).collect();
        assert_eq!(rx, vec![0, 0, 0, 1, 1, 2, 2, 2, 3, 3]);
    }

    #[test]
    fn test_setters_validate_and_leave_field_unchanged() {
        let mut field = RegionField::new(4, 16, 16).unwrap();
        field.set_mutation_rate(1, 1, 0.25).unwrap();
        assert!(field.set_mutation_rate(1, 1, 1.5).is_err());
        assert!(field.set_mutation_rate(1, 1, f32::NAN).is_err());
        assert_eq!(field.region(1, 1).unwrap().mutation_rate, 0.25);

        assert!(field.set_randomness(0, 0, -0.1).is_err());
        assert!(field.set_temperature(0, 0, 0.0).is_err());
        assert!(field.set_energy(0, 0, f32::INFINITY).is_err());
        assert!(field.set_directional_influence(0, 0, Direction::East, f32::NAN).is_err());
        assert!(field.set_obstacle(4, 0, true).is_err());
        assert_eq!(*field.region(0, 0).unwrap(), Region::neutral());

        field.set_directional_influence(2, 3, Direction::West, -3.5).unwrap();
        assert_eq!(field.region(2, 3).unwrap().influence(Direction::West), -3.5);
    }

    #[test]
    fn test_set_region_validates_whole_record() {
        let mut field = RegionField::new(4, 16, 16).unwrap();
        let mut r = Region::neutral();
        r.temperature = -1.0;
        assert!(field.set_region(0, 0, r).is_err());

        r.temperature = 2.0;
        r.set_obstacle(true);
        field.set_region(0, 0, r).unwrap();
        assert!(field.region(0, 0).unwrap().is_obstacle());
        assert!(field.region_of_tape(0).is_obstacle());
    }

    #[test]
    fn test_resize_resets_attributes() {
        let mut field = RegionField::new(4, 32, 32).unwrap();
        field.set_obstacle(0, 0, true).unwrap();
        field.resize(16).unwrap();
        assert_eq!(field.len(), 256);
        assert!(field.regions().iter().all(|r| *r == Region::neutral()));
        assert_eq!(field.region_for_cell(31, 31).unwrap(), 255);

        assert!(field.resize(5).is_err());
        assert_eq!(field.size(), 16);
    }

    #[test]
    fn test_tapes_in_region_agrees_with_cell_map() {
        for (size, w, h) in [(4, 200, 200), (8, 10, 6), (16, 20, 17)] {
            let field = RegionField::new(size, w, h).unwrap();
            let mut seen = 0;
            for ry in 0..size {
                for rx in 0..size {
                    let tapes = field.tapes_in_region(rx, ry).unwrap();
                    let n = tapes.len();
                    let collected: Vec<usize> = tapes.collect();
                    assert_eq!(collected.len(), n);
                    for t in collected {
                        assert_eq!(field.cell_map()[t] as usize, ry * size + rx);
                    }
                    seen += n;
                }
            }
            assert_eq!(seen, w * h);
        }
    }

    #[test]
    fn test_tapes_in_region_corners_and_restart() {
        let field = RegionField::new(4, 200, 200).unwrap();
        let mut tapes = field.tapes_in_region(3, 3).unwrap();
        assert_eq!(tapes.len(), 50 * 50);
        assert_eq!(tapes.next(), Some(200 * 150 + 150));
        assert_eq!(tapes.clone().last(), Some(200 * 200 - 1));
        tapes.restart();
        assert_eq!(tapes.count(), 2500);

        assert!(field.tapes_in_region(4, 0).is_err());
    }

    #[test]
    fn test_direction_index() {
        assert_eq!(Direction::from_index(1), Some(Direction::East));
        assert_eq!(Direction::from_index(4), None);
        assert_eq!(Direction::West.index(), 3);
    }
}
