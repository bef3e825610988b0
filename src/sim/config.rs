//! Project configuration and runtime context.
//!
//! A [`ProjectConfig`] is the serde image of the JSON configuration file; a
//! [`ProjectContext`] is the validated runtime form with crystals built and
//! filters resolved. All range checks happen here: the tracer never starts
//! on a malformed context.

use crate::Crystal;
use crate::Vec3;
use crate::sim::filter::{FilterKind, RayPathFilter};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Buffer head-room factor: buffers grow to `active_rays * BUFFER_FACTOR`.
pub const BUFFER_FACTOR: usize = 4;

/// Default weight below which a packet is pruned inside a trace.
pub const DEFAULT_PROP_MIN_W: f64 = 1e-3;

/// Default weight below which a finished packet is dropped between scatter
/// passes.
pub const DEFAULT_SCAT_MIN_W: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Uniform,
    Gauss,
}

/// Sampling parameters for the crystal main axis and roll.
///
/// The zenith distribution describes the angle between the main axis and
/// the vertical; angles are in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisDistribution {
    pub zenith_dist: DistributionKind,
    #[serde(default)]
    pub zenith_mean_deg: f64,
    #[serde(default)]
    pub zenith_std_deg: f64,
    pub roll_dist: DistributionKind,
    #[serde(default)]
    pub roll_mean_deg: f64,
    #[serde(default)]
    pub roll_std_deg: f64,
}

impl AxisDistribution {
    /// Uniform orientation on the sphere with uniform roll.
    pub fn uniform() -> Self {
        Self {
            zenith_dist: DistributionKind::Uniform,
            zenith_mean_deg: 0.0,
            zenith_std_deg: 0.0,
            roll_dist: DistributionKind::Uniform,
            roll_mean_deg: 0.0,
            roll_std_deg: 0.0,
        }
    }

    /// Gaussian zenith angle, uniform roll (plate and column orientations).
    pub fn zenith_gauss(mean_deg: f64, std_deg: f64) -> Self {
        Self {
            zenith_dist: DistributionKind::Gauss,
            zenith_mean_deg: mean_deg,
            zenith_std_deg: std_deg,
            roll_dist: DistributionKind::Uniform,
            roll_mean_deg: 0.0,
            roll_std_deg: 0.0,
        }
    }

    /// Gaussian zenith angle and Gaussian roll (Parry orientation).
    pub fn zenith_roll_gauss(
        zenith_mean_deg: f64,
        zenith_std_deg: f64,
        roll_mean_deg: f64,
        roll_std_deg: f64,
    ) -> Self {
        Self {
            zenith_dist: DistributionKind::Gauss,
            zenith_mean_deg,
            zenith_std_deg,
            roll_dist: DistributionKind::Gauss,
            roll_mean_deg,
            roll_std_deg,
        }
    }
}

fn default_sun_diameter() -> f64 {
    0.5
}

/// Sun position and apparent size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SunConfig {
    /// Solar altitude angle in degrees (0 = horizon, 90 = zenith).
    pub altitude_deg: f64,
    /// Solar azimuth angle in degrees from north, clockwise.
    #[serde(default)]
    pub azimuth_deg: f64,
    /// Apparent diameter in degrees.
    #[serde(default = "default_sun_diameter")]
    pub diameter_deg: f64,
}

impl SunConfig {
    pub fn new(altitude_deg: f64) -> Self {
        Self {
            altitude_deg,
            azimuth_deg: 0.0,
            diameter_deg: default_sun_diameter(),
        }
    }

    /// Unit vector pointing toward the sun.
    ///
    /// Convention: azimuth from north clockwise, north = +y, east = +x.
    pub fn direction(&self) -> Vec3 {
        let alt = self.altitude_deg.to_radians();
        let azi = self.azimuth_deg.to_radians();
        Vec3::new(alt.cos() * azi.sin(), alt.cos() * azi.cos(), alt.sin())
    }

    /// Direction sunlight travels: the opposite of [`SunConfig::direction`].
    pub fn ray_direction(&self) -> Vec3 {
        -self.direction()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WavelengthInfo {
    /// Wavelength in nanometers.
    pub wavelength: f64,
    /// Relative spectral weight.
    pub weight: f64,
}

/// Crystal factory parameters as they appear in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrystalShape {
    HexPrism {
        h: f64,
    },
    HexPyramid {
        h1: f64,
        h2: f64,
        h3: f64,
    },
    HexPyramidMiller {
        upper_idx: [i32; 2],
        lower_idx: [i32; 2],
        h1: f64,
        h2: f64,
        h3: f64,
    },
    CubicPyramid {
        ratio1: f64,
        ratio2: f64,
    },
    IrregularHexPrism {
        dist: [f64; 6],
        h: f64,
    },
    IrregularHexPyramid {
        dist: [f64; 6],
        idx: [i32; 4],
        heights: [f64; 3],
    },
}

impl CrystalShape {
    pub fn build(&self) -> Crystal {
        match *self {
            CrystalShape::HexPrism { h } => Crystal::hex_prism(h),
            CrystalShape::HexPyramid { h1, h2, h3 } => Crystal::hex_pyramid(h1, h2, h3),
            CrystalShape::HexPyramidMiller {
                upper_idx,
                lower_idx,
                h1,
                h2,
                h3,
            } => Crystal::hex_pyramid_miller(
                upper_idx[0],
                upper_idx[1],
                lower_idx[0],
                lower_idx[1],
                h1,
                h2,
                h3,
            ),
            CrystalShape::CubicPyramid { ratio1, ratio2 } => Crystal::cubic_pyramid(ratio1, ratio2),
            CrystalShape::IrregularHexPrism { dist, h } => Crystal::irregular_hex_prism(dist, h),
            CrystalShape::IrregularHexPyramid { dist, idx, heights } => {
                Crystal::irregular_hex_pyramid(dist, idx, heights)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrystalSetting {
    pub id: u32,
    pub shape: CrystalShape,
    pub axis: AxisDistribution,
}

/// Filter rules as they appear in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterRule {
    None,
    Specific {
        paths: Vec<Vec<i32>>,
    },
    General {
        #[serde(default)]
        enter: Vec<i32>,
        #[serde(default)]
        exit: Vec<i32>,
        #[serde(default)]
        hits: Option<usize>,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSetting {
    pub id: u32,
    pub rule: FilterRule,
    #[serde(default = "default_true")]
    pub symmetry_rotation: bool,
    #[serde(default = "default_true")]
    pub symmetry_mirror: bool,
}

impl FilterSetting {
    fn build(&self) -> RayPathFilter {
        let kind = match &self.rule {
            FilterRule::None => FilterKind::All,
            FilterRule::Specific { paths } => FilterKind::Specific {
                paths: paths.clone(),
            },
            FilterRule::General { enter, exit, hits } => FilterKind::General {
                enter: enter.clone(),
                exit: exit.clone(),
                hits: *hits,
            },
        };
        let mut filter = RayPathFilter::new(kind);
        filter.apply_rotation = self.symmetry_rotation;
        filter.apply_mirror = self.symmetry_mirror;
        filter
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScatterCrystalRef {
    pub crystal_id: u32,
    /// Fraction of the pass's rays sent into this crystal population.
    pub population: f64,
    #[serde(default)]
    pub filter_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterPass {
    pub crystals: Vec<ScatterCrystalRef>,
    /// Probability that a surviving ray re-enters the next pass.
    #[serde(default)]
    pub probability: f64,
}

/// Serde image of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub ray_number: usize,
    pub max_recursion: usize,
    pub sun: SunConfig,
    pub wavelengths: Vec<WavelengthInfo>,
    pub crystals: Vec<CrystalSetting>,
    #[serde(default)]
    pub filters: Vec<FilterSetting>,
    pub multi_scatter: Vec<ScatterPass>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub prop_min_w: Option<f64>,
    #[serde(default)]
    pub scat_min_w: Option<f64>,
}

/// A crystal population with its orientation distribution.
#[derive(Debug, Clone)]
pub struct CrystalContext {
    pub crystal: Arc<Crystal>,
    pub axis: AxisDistribution,
}

/// Validated runtime context consumed by the simulator.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub init_ray_num: usize,
    pub max_recursion: usize,
    pub sun: SunConfig,
    pub wavelengths: Vec<WavelengthInfo>,
    pub scatter_passes: Vec<ScatterPass>,
    pub prop_min_w: f64,
    pub scat_min_w: f64,
    pub seed: Option<u64>,
    crystals: HashMap<u32, CrystalContext>,
    filters: HashMap<u32, RayPathFilter>,
}

impl ProjectContext {
    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;
        let reader = BufReader::new(file);
        let config: ProjectConfig = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Self::from_config(config)
    }

    /// Builds the runtime context from a parsed configuration.
    pub fn from_config(config: ProjectConfig) -> Result<Self> {
        let mut crystals = HashMap::new();
        for setting in &config.crystals {
            let crystal = setting.shape.build();
            let total_area: f64 = (0..crystal.total_faces()).map(|f| crystal.area(f)).sum();
            if total_area <= 0.0 {
                bail!("Crystal {} has no sampleable surface", setting.id);
            }
            if crystals
                .insert(
                    setting.id,
                    CrystalContext {
                        crystal: Arc::new(crystal),
                        axis: setting.axis,
                    },
                )
                .is_some()
            {
                bail!("Duplicate crystal id {}", setting.id);
            }
        }

        let mut filters = HashMap::new();
        for setting in &config.filters {
            if filters.insert(setting.id, setting.build()).is_some() {
                bail!("Duplicate filter id {}", setting.id);
            }
        }

        let context = Self {
            init_ray_num: config.ray_number,
            max_recursion: config.max_recursion,
            sun: config.sun,
            wavelengths: config.wavelengths,
            scatter_passes: config.multi_scatter,
            prop_min_w: config.prop_min_w.unwrap_or(DEFAULT_PROP_MIN_W),
            scat_min_w: config.scat_min_w.unwrap_or(DEFAULT_SCAT_MIN_W),
            seed: config.seed,
            crystals,
            filters,
        };
        context.validate()?;
        Ok(context)
    }

    /// Programmatic context for a single crystal population; mostly used by
    /// tests and examples.
    pub fn single_crystal(
        crystal: Crystal,
        axis: AxisDistribution,
        ray_number: usize,
        max_recursion: usize,
        sun_altitude_deg: f64,
    ) -> Self {
        let mut crystals = HashMap::new();
        crystals.insert(
            0,
            CrystalContext {
                crystal: Arc::new(crystal),
                axis,
            },
        );
        Self {
            init_ray_num: ray_number,
            max_recursion,
            sun: SunConfig::new(sun_altitude_deg),
            wavelengths: vec![WavelengthInfo {
                wavelength: 550.0,
                weight: 1.0,
            }],
            scatter_passes: vec![ScatterPass {
                crystals: vec![ScatterCrystalRef {
                    crystal_id: 0,
                    population: 1.0,
                    filter_id: None,
                }],
                probability: 0.0,
            }],
            prop_min_w: DEFAULT_PROP_MIN_W,
            scat_min_w: DEFAULT_SCAT_MIN_W,
            seed: None,
            crystals,
            filters: HashMap::new(),
        }
    }

    pub fn crystal(&self, id: u32) -> Option<&CrystalContext> {
        self.crystals.get(&id)
    }

    /// Resolves a filter reference; `None` and unknown ids accept all rays.
    pub fn filter(&self, id: Option<u32>) -> RayPathFilter {
        id.and_then(|id| self.filters.get(&id).cloned())
            .unwrap_or_else(RayPathFilter::accept_all)
    }

    fn validate(&self) -> Result<()> {
        if self.init_ray_num == 0 {
            bail!("ray_number must be positive");
        }
        if self.max_recursion == 0 {
            bail!("max_recursion must be positive");
        }
        if self.wavelengths.is_empty() {
            bail!("At least one wavelength is required");
        }
        for info in &self.wavelengths {
            if !(350.0..=900.0).contains(&info.wavelength) {
                bail!(
                    "Wavelength {} nm outside the supported range 350-900 nm",
                    info.wavelength
                );
            }
            if info.weight <= 0.0 {
                bail!("Wavelength weight must be positive");
            }
        }
        if !(-90.0..=90.0).contains(&self.sun.altitude_deg) {
            bail!("Sun altitude must be within [-90, 90] degrees");
        }
        if self.sun.diameter_deg < 0.0 {
            bail!("Sun diameter must not be negative");
        }
        if self.scatter_passes.is_empty() {
            bail!("At least one scatter pass is required");
        }
        for (i, pass) in self.scatter_passes.iter().enumerate() {
            if pass.crystals.is_empty() {
                bail!("Scatter pass {i} lists no crystals");
            }
            if !(0.0..=1.0).contains(&pass.probability) {
                bail!("Scatter probability must be within [0, 1]");
            }
            let population_sum: f64 = pass.crystals.iter().map(|c| c.population).sum();
            if population_sum > 1.0 + 1e-9 {
                bail!(
                    "Scatter pass {i} populations sum to {population_sum}; they are \
                     fractions of the pass's rays and must not exceed 1"
                );
            }
            for c in &pass.crystals {
                if c.population <= 0.0 {
                    bail!("Crystal population must be positive");
                }
                if !self.crystals.contains_key(&c.crystal_id) {
                    bail!("Unknown crystal id {}", c.crystal_id);
                }
                if let Some(fid) = c.filter_id
                    && !self.filters.contains_key(&fid)
                {
                    bail!("Unknown filter id {fid}");
                }
            }
        }
        if self.prop_min_w < 0.0 || self.scat_min_w < 0.0 {
            bail!("Weight thresholds must not be negative");
        }
        Ok(())
    }
}
