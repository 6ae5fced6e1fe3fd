//! Per-texel column summaries.

use rayon::prelude::*;
use snowpack_core::{ColumnData, ColumnIndex};

/// R x R array of [`ColumnData`], the authoritative snow height and mass of
/// every height-field texel.
#[derive(Clone, Debug)]
pub struct ColumnAggregate {
    resolution: u32,
    columns: Vec<ColumnData>,
}

impl ColumnAggregate {
    /// Create bare-ground columns over the given ground raster.
    pub fn new(resolution: u32, ground: &[f32]) -> Self {
        debug_assert_eq!(ground.len(), resolution as usize * resolution as usize);
        let columns = ground
            .par_iter()
            .map(|&ground_height| ColumnData {
                ground_height,
                ..ColumnData::default()
            })
            .collect();
        Self {
            resolution,
            columns,
        }
    }

    #[inline]
    pub const fn resolution(&self) -> u32 {
        self.resolution
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[inline]
    pub fn get(&self, index: ColumnIndex) -> Option<&ColumnData> {
        if index.x >= self.resolution || index.z >= self.resolution {
            return None;
        }
        self.columns.get(index.to_linear(self.resolution))
    }

    #[inline]
    pub fn as_slice(&self) -> &[ColumnData] {
        &self.columns
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [ColumnData] {
        &mut self.columns
    }

    /// Zero the scratch accumulators before re-aggregation.
    pub fn clear_totals(&mut self) {
        self.columns
            .par_iter_mut()
            .for_each(|column| column.mass_temp = 0.0);
    }

    /// Raise every column by `height` meters carrying `mass` kilograms.
    pub fn deposit(&mut self, height: f32, mass: f32) {
        self.columns.par_iter_mut().for_each(|column| {
            column.height += height;
            column.mass += mass;
        });
    }

    /// Remove all snow, keeping the ground.
    pub fn clear_snow(&mut self) {
        self.columns.par_iter_mut().for_each(|column| {
            column.height = 0.0;
            column.mass = 0.0;
            column.mass_temp = 0.0;
        });
    }

    /// Replace the ground offsets, e.g. after regenerating the ground.
    pub fn set_ground(&mut self, ground: &[f32]) {
        self.columns
            .par_iter_mut()
            .zip(ground.par_iter())
            .for_each(|(column, &ground_height)| column.ground_height = ground_height);
    }

    /// Sum of column masses (f64 accumulation).
    pub fn total_mass(&self) -> f64 {
        self.columns.par_iter().map(|c| f64::from(c.mass)).sum()
    }

    /// Deepest snow over all columns.
    pub fn max_height(&self) -> f32 {
        self.columns
            .par_iter()
            .map(|c| c.height)
            .reduce(|| 0.0, f32::max)
    }
}
