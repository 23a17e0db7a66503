//! Configuration (loadable from YAML).
//!
//! ```yaml
//! engine:
//!   width: 200
//!   height: 200
//!   tape_len: 16
//!   max_pairs: 8192
//!   seed: 42
//!   regions:
//!     grid_size: 4
//!     cells:
//!       - { x: 1, y: 0, obstacle: true }
//!       - { x: 2, y: 2, temperature: 0.5, influence: [0.0, 0.8, 0.0, 0.0] }
//! run:
//!   ticks: 1000
//!   noise: 0.0625
//!   report_interval: 100
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::{Region, REGION_GRID_SIZES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration: engine geometry plus the host loop settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub run: RunConfig,
}

/// Fixed engine geometry and the initial region layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soup width in tapes
    pub width: usize,
    /// Soup height in tapes
    pub height: usize,
    /// Bytes per tape, must be a power of two
    pub tape_len: usize,
    /// Pair capacity of one batch
    pub max_pairs: usize,
    /// Seed passed to `init`
    pub seed: i32,
    /// Region field applied after `init` (None = uniform mode)
    pub regions: Option<RegionLayout>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            tape_len: 16,
            max_pairs: 8 * 1024,
            seed: 42,
            regions: None,
        }
    }
}

/// Region grid size plus per-region overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    pub grid_size: usize,
    pub cells: Vec<RegionCell>,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            grid_size: 8,
            cells: Vec::new(),
        }
    }
}

/// Overrides for the region at `(x, y)`; unset fields stay neutral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionCell {
    pub x: usize,
    pub y: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstacle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_rate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub randomness: Option<f32>,
    /// North, East, South, West
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influence: Option<[f32; 4]>,
}

impl RegionCell {
    /// The region record this cell describes.
    pub fn to_region(&self) -> Region {
        let mut region = Region::neutral();
        if let Some(obstacle) = self.obstacle {
            region.set_obstacle(obstacle);
        }
        if let Some(v) = self.mutation_rate {
            region.mutation_rate = v;
        }
        if let Some(v) = self.temperature {
            region.temperature = v;
        }
        if let Some(v) = self.energy {
            region.energy = v;
        }
        if let Some(v) = self.randomness {
            region.randomness_factor = v;
        }
        if let Some(v) = self.influence {
            region.directional_influence = v;
        }
        region
    }
}

/// Host loop settings for the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of prepare/absorb ticks
    pub ticks: usize,
    /// Point mutations per absorbed pair
    pub noise: f64,
    /// Ticks between census reports (0 = only at the end)
    pub report_interval: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: 1000,
            noise: 1.0 / 16.0,
            report_interval: 100,
        }
    }
}

impl Config {
    pub fn from_yaml(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn to_yaml(&self, path: &str) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Write the default configuration, with an example region layout.
    pub fn write_template(path: &str) -> Result<(), ConfigError> {
        let mut config = Config::default();
        config.engine.regions = Some(RegionLayout {
            grid_size: 4,
            cells: vec![
                RegionCell {
                    x: 1,
                    y: 0,
                    obstacle: Some(true),
                    ..Default::default()
                },
                RegionCell {
                    x: 2,
                    y: 2,
                    temperature: Some(0.5),
                    influence: Some([0.0, 0.8, 0.0, 0.0]),
                    ..Default::default()
                },
            ],
        });
        config.to_yaml(path)
    }

    /// Validate the configuration. Returns warnings, or an error if the
    /// engine cannot be built from it.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = self.engine.validate()?;
        if !self.run.noise.is_finite() || self.run.noise < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "run.noise {} must be a non-negative number",
                self.run.noise
            )));
        }
        if self.run.noise == 0.0 {
            warnings.push("run.noise is 0, the soup will never mutate".to_string());
        }
        if self.run.report_interval > self.run.ticks {
            warnings.push(format!(
                "report_interval {} exceeds ticks {}, only the final report is printed",
                self.run.report_interval, self.run.ticks
            ));
        }
        Ok(warnings)
    }
}

impl EngineConfig {
    pub fn tape_count(&self) -> usize {
        self.width * self.height
    }

    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "grid dimensions must be non-zero".to_string(),
            ));
        }
        if !self.tape_len.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "tape_len {} must be a power of two",
                self.tape_len
            )));
        }
        if self.max_pairs == 0 {
            return Err(ConfigError::Invalid("max_pairs must be at least 1".to_string()));
        }
        let soup_bytes = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.tape_len));
        if soup_bytes.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{}x{} tapes of {} bytes overflow the soup size",
                self.width, self.height, self.tape_len
            )));
        }
        if self.tape_count() > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "{} tapes exceed the u32 pair index range",
                self.tape_count()
            )));
        }
        if self.max_pairs > self.tape_count() / 2 {
            warnings.push(format!(
                "max_pairs {} can never be reached on a {}x{} grid",
                self.max_pairs, self.width, self.height
            ));
        }

        if let Some(layout) = &self.regions {
            if !REGION_GRID_SIZES.contains(&layout.grid_size) {
                return Err(ConfigError::Invalid(format!(
                    "region grid_size {} (expected 4, 8 or 16)",
                    layout.grid_size
                )));
            }
            if self.width < layout.grid_size || self.height < layout.grid_size {
                warnings.push(format!(
                    "{0}x{0} regions over a {1}x{2} grid leave some regions empty",
                    layout.grid_size, self.width, self.height
                ));
            }
            for (i, cell) in layout.cells.iter().enumerate() {
                if cell.x >= layout.grid_size || cell.y >= layout.grid_size {
                    return Err(ConfigError::Invalid(format!(
                        "regions.cells[{i}] at ({}, {}) outside {g}x{g} grid",
                        cell.x,
                        cell.y,
                        g = layout.grid_size
                    )));
                }
                cell.to_region()
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("regions.cells[{i}]: {e}")))?;
            }
        }

        Ok(warnings)
    }
}
