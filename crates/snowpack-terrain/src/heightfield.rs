//! Ground and snow-depth rasters.

use rayon::prelude::*;
use snowpack_core::constants::SLOT_EPSILON;
use snowpack_core::SimConfig;
use tracing::{debug, info};

use crate::columns::ColumnAggregate;
use crate::generation::GroundGenerator;
use crate::mapping::PlaneMapping;

/// Owns the ground elevation raster and the render-facing snow-depth raster.
///
/// Snow height and mass live in [`ColumnAggregate`]; the height field
/// deposits into it and mirrors its heights back for presentation after
/// every tick.
pub struct HeightField {
    generator: GroundGenerator,
    mapping: PlaneMapping,
    cell_size: f32,
    ground: Vec<f32>,
    snow_depth: Vec<f32>,
    /// Temperature tag of the most recent deposit.
    deposit_temperature: f32,
}

impl HeightField {
    /// Create the rasters and generate the ground.
    pub fn new(config: &SimConfig) -> Self {
        let texels = config.resolution as usize * config.resolution as usize;
        let mut field = Self {
            generator: GroundGenerator::new(config.ground),
            mapping: PlaneMapping::new(config.plane, config.resolution),
            cell_size: config.cell_size,
            ground: vec![0.0; texels],
            snow_depth: vec![0.0; texels],
            deposit_temperature: config.tunables.air_temperature,
        };
        field.generate();
        field
    }

    /// (Re)generate the ground raster.
    pub fn generate(&mut self) {
        self.ground = self.generator.generate(self.mapping.resolution());
        info!(
            resolution = self.mapping.resolution(),
            seed = self.generator.config().seed,
            "Generated ground height map"
        );
    }

    #[inline]
    pub fn mapping(&self) -> &PlaneMapping {
        &self.mapping
    }

    #[inline]
    pub fn ground(&self) -> &[f32] {
        &self.ground
    }

    #[inline]
    pub fn snow_depth(&self) -> &[f32] {
        &self.snow_depth
    }

    #[inline]
    pub fn deposit_temperature(&self) -> f32 {
        self.deposit_temperature
    }

    /// Round `amount` down to a whole number of cells so repopulation is exact.
    pub fn quantize(&self, amount: f32) -> f32 {
        if !(amount > 0.0) {
            return 0.0;
        }
        (amount / self.cell_size + SLOT_EPSILON).floor() * self.cell_size
    }

    /// Deposit `amount` meters of fresh snow at `temperature` on every column.
    ///
    /// Returns the deposited (quantised) depth.
    pub fn add_snow(
        &mut self,
        columns: &mut ColumnAggregate,
        amount: f32,
        temperature: f32,
        fresh_snow_density: f32,
    ) -> f32 {
        let height = self.quantize(amount);
        if height == 0.0 {
            debug!(requested = amount, "Snow deposit quantised to zero");
            return 0.0;
        }
        let mass = height * self.cell_size * self.cell_size * fresh_snow_density;
        columns.deposit(height, mass);
        self.deposit_temperature = temperature;
        self.sync_from(columns);
        info!(height, mass, temperature, "Added snow");
        height
    }

    /// Remove all snow, keeping the ground.
    pub fn clear_snow(&mut self, columns: &mut ColumnAggregate) {
        columns.clear_snow();
        self.snow_depth.par_iter_mut().for_each(|d| *d = 0.0);
    }

    /// Regenerate the ground and remove all snow.
    pub fn reset(&mut self, columns: &mut ColumnAggregate) {
        self.generate();
        columns.set_ground(&self.ground);
        self.clear_snow(columns);
    }

    /// Mirror column heights into the snow-depth raster.
    pub fn sync_from(&mut self, columns: &ColumnAggregate) {
        self.snow_depth
            .par_iter_mut()
            .zip(columns.as_slice().par_iter())
            .for_each(|(depth, column)| *depth = column.height);
    }
}
