//! Simulation configuration.
//!
//! [`SimConfig`] holds the structural parameters fixed for a simulation's
//! lifetime (grid dimensions, raster resolution, placement) together with the
//! initial [`Tunables`]. Tunables may be replaced at any tick boundary; a
//! change to anything else requires re-initialising the simulation.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::coords::GridDimensions;
use crate::error::{Error, Result};

/// Compaction coefficients.
///
/// Two pairs: the deformation pair governs the onset and rate of plastic
/// compaction, the hardening pair governs how fast hardness builds and
/// decays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionCoefficients {
    /// Destructive deformation coefficient (strain rate per kPa of excess load).
    pub k_d_p: f32,
    /// Constructive deformation coefficient (yield stress of fresh snow, kPa).
    pub k_c_p: f32,
    /// Destructive hardening coefficient (decay rate of hardness).
    pub h_d_p: f32,
    /// Constructive hardening coefficient (hardness gained per unit strain, kPa).
    pub h_c_p: f32,
}

impl Default for CompactionCoefficients {
    fn default() -> Self {
        Self {
            k_d_p: 3.56,
            k_c_p: 0.54,
            h_d_p: 2.24,
            h_c_p: 2.0,
        }
    }
}

/// Parameters that may change at any tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    /// Density of newly deposited snow (kg/m^3).
    pub fresh_snow_density: f32,
    /// Density ceiling (kg/m^3).
    pub max_snow_density: f32,
    /// Coldest temperature snow may reach away from the ground (°C).
    pub min_snow_temperature: f32,
    /// Air temperature at the snow surface (°C).
    pub air_temperature: f32,
    /// Temperature of the ground under the snowpack (°C).
    pub ground_temperature: f32,
    pub compaction: CompactionCoefficients,
    /// Depth deposited by an add-snow request (m), quantised to the cell size.
    pub snow_added_height: f32,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            fresh_snow_density: 20.0,
            max_snow_density: 100.0,
            min_snow_temperature: -20.0,
            air_temperature: -3.0,
            ground_temperature: -30.0,
            compaction: CompactionCoefficients::default(),
            snow_added_height: 6.0,
            time_scale: 0.0,
        }
    }
}

impl Tunables {
    /// Lowest temperature any cell may take (base slot included).
    #[inline]
    pub fn temperature_floor(&self) -> f32 {
        self.min_snow_temperature.min(self.ground_temperature)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fresh_snow_density > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "fresh snow density must be positive, got {}",
                self.fresh_snow_density
            )));
        }
        if self.max_snow_density < self.fresh_snow_density {
            return Err(Error::InvalidConfig(format!(
                "max snow density {} is below fresh snow density {}",
                self.max_snow_density, self.fresh_snow_density
            )));
        }
        if self.min_snow_temperature > self.air_temperature {
            return Err(Error::InvalidConfig(format!(
                "min snow temperature {} is above air temperature {}",
                self.min_snow_temperature, self.air_temperature
            )));
        }
        if !(self.time_scale >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "time scale must be non-negative, got {}",
                self.time_scale
            )));
        }
        if !(self.snow_added_height >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "added snow height must be non-negative, got {}",
                self.snow_added_height
            )));
        }
        let c = self.compaction;
        if [c.k_d_p, c.k_c_p, c.h_d_p, c.h_c_p]
            .iter()
            .any(|v| !(*v >= 0.0))
        {
            return Err(Error::InvalidConfig(format!(
                "compaction coefficients must be non-negative, got {c:?}"
            )));
        }
        Ok(())
    }
}

/// Procedural ground configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundConfig {
    /// Seed for noise generation.
    pub seed: u32,
    /// Peak-to-trough ground relief (m).
    pub amplitude: f32,
    /// Horizontal size of terrain features in texels.
    pub feature_scale: f64,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            amplitude: 0.5,
            feature_scale: 256.0,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

/// Placement of the square height-field plane in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// World-space centre of the plane.
    pub center: Vec3,
    /// Side length of the plane (m).
    pub side_size: f32,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            side_size: 10.0,
        }
    }
}

/// Full simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Height-field resolution R (texels per side).
    pub resolution: u32,
    pub grid: GridDimensions,
    /// Edge length of a grid cell (m).
    pub cell_size: f32,
    /// World XZ centre of the grid.
    pub grid_center: Vec2,
    pub plane: PlaneConfig,
    pub ground: GroundConfig,
    pub tunables: Tunables,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            grid: GridDimensions::default(),
            cell_size: 0.2,
            grid_center: Vec2::ZERO,
            plane: PlaneConfig::default(),
            ground: GroundConfig::default(),
            tunables: Tunables::default(),
        }
    }
}

impl SimConfig {
    /// Set the height-field resolution.
    #[must_use]
    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the grid dimensions and cell size.
    #[must_use]
    pub fn with_grid(mut self, grid: GridDimensions, cell_size: f32) -> Self {
        self.grid = grid;
        self.cell_size = cell_size;
        self
    }

    /// Set the plane placement.
    #[must_use]
    pub fn with_plane(mut self, center: Vec3, side_size: f32) -> Self {
        self.plane = PlaneConfig { center, side_size };
        self
    }

    /// Set the grid's XZ centre.
    #[must_use]
    pub fn with_grid_center(mut self, center: Vec2) -> Self {
        self.grid_center = center;
        self
    }

    /// Set the ground generator configuration.
    #[must_use]
    pub fn with_ground(mut self, ground: GroundConfig) -> Self {
        self.ground = ground;
        self
    }

    /// Set the initial tunables.
    #[must_use]
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Set the initial time scale.
    #[must_use]
    pub fn with_time_scale(mut self, time_scale: f32) -> Self {
        self.tunables.time_scale = time_scale;
        self
    }

    /// Cross-sectional area of one grid column (m^2).
    #[inline]
    pub fn cell_area(&self) -> f32 {
        self.cell_size * self.cell_size
    }

    /// World distance between adjacent texel centres.
    #[inline]
    pub fn texel_spacing(&self) -> f32 {
        self.plane.side_size / (self.resolution.max(2) - 1) as f32
    }

    /// World XZ extent covered by the grid.
    #[inline]
    pub fn grid_extent(&self) -> Vec2 {
        Vec2::new(
            self.grid.width as f32 * self.cell_size,
            self.grid.depth as f32 * self.cell_size,
        )
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.resolution < 2 {
            return Err(Error::InvalidConfig(format!(
                "resolution must be at least 2, got {}",
                self.resolution
            )));
        }
        if self.grid.cell_count() == 0 {
            return Err(Error::InvalidConfig(format!(
                "grid dimensions must be non-zero, got {:?}",
                self.grid
            )));
        }
        if !(self.cell_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.plane.side_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "plane side size must be positive, got {}",
                self.plane.side_size
            )));
        }
        // Every grid column must contain the texel it samples.
        if self.texel_spacing() > self.cell_size {
            return Err(Error::InvalidConfig(format!(
                "texel spacing {} exceeds cell size {}",
                self.texel_spacing(),
                self.cell_size
            )));
        }
        let half_plane = self.plane.side_size * 0.5;
        let half_grid = self.grid_extent() * 0.5;
        let offset = (self.grid_center - Vec2::new(self.plane.center.x, self.plane.center.z)).abs();
        let tolerance = self.cell_size * 1.0e-3;
        if offset.x + half_grid.x > half_plane + tolerance
            || offset.y + half_grid.y > half_plane + tolerance
        {
            return Err(Error::InvalidConfig(format!(
                "grid footprint {:?} centred at {:?} exceeds the plane",
                self.grid_extent(),
                self.grid_center
            )));
        }
        self.tunables.validate()
    }
}
