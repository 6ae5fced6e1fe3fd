//! Compaction kernels.
//!
//! Every kernel works on whole grid columns (`par_chunks_mut(H)`), so a work
//! item only ever writes the cells of its own column. Lateral pressure reads
//! neighbouring columns from an immutable pass before anything is written.
//!
//! Pressures are in pascals with compression pointing down (negative Y).
//! Compaction starts once load exceeds the yield strength
//!
//! ```text
//! yield = k_c_p * P_ref * (density / fresh_density) + hardness
//! ```
//!
//! and the per-tick strain grows with the excess load scaled by `k_d_p`.

use glam::Vec3;
use rayon::prelude::*;
use snowpack_core::constants::{GRAVITY, REFERENCE_PRESSURE};
use snowpack_core::{Cell, ColumnData, GridDimensions, GridIndex, Tunables};

use crate::grid::VoxelGrid;

/// Strain rate in 1/s per unit of normalised excess load.
pub const STRAIN_RATE: f32 = 0.1;
/// Largest fraction of a cell's fill that can collapse in one tick.
pub const MAX_STRAIN_PER_TICK: f32 = 0.25;
/// Hardness decay rate in 1/s.
pub const HARDNESS_DECAY_RATE: f32 = 0.01;
/// Relaxation rate of cell temperature towards the column profile, in 1/s.
pub const THERMAL_RATE: f32 = 0.01;
/// Vertical density exchange rate in 1/s.
pub const RESAMPLE_RATE: f32 = 0.5;
/// Upper bound on the share of vertical load turned sideways.
const LATERAL_SHARE: f32 = 0.5;

/// Counters produced by [`apply_forces`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Cells that compacted this tick.
    pub compacted_cells: usize,
    /// Cells that hit max density and shed mass into overflow.
    pub saturated_cells: usize,
}

impl ApplyStats {
    const fn merge(self, other: Self) -> Self {
        Self {
            compacted_cells: self.compacted_cells + other.compacted_cells,
            saturated_cells: self.saturated_cells + other.saturated_cells,
        }
    }
}

/// Yield strength of a cell in pascals.
#[inline]
pub fn yield_strength(cell: &Cell, tunables: &Tunables) -> f32 {
    tunables.compaction.k_c_p * REFERENCE_PRESSURE * (cell.density / tunables.fresh_snow_density)
        + cell.hardness
}

/// Fraction of fill that collapses under `load` in `dt` seconds.
#[inline]
fn strain(load: f32, strength: f32, tunables: &Tunables, dt: f32) -> f32 {
    let excess = (load - strength).max(0.0);
    (tunables.compaction.k_d_p * (excess / REFERENCE_PRESSURE) * STRAIN_RATE * dt)
        .min(MAX_STRAIN_PER_TICK)
}

/// How far a temperature lies between the melting point (0) and the coldest
/// snow (1), clamped to `[0, 1]`.
#[inline]
fn cold_factor(temperature: f32, tunables: &Tunables) -> f32 {
    let span = -tunables.min_snow_temperature;
    if span > 0.0 {
        (-temperature / span).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// In-bounds horizontal neighbours of `(x, z)` with the axis they lie along.
fn neighbour_coords(
    x: u32,
    z: u32,
    dims: GridDimensions,
) -> impl Iterator<Item = (u32, u32, Vec3)> {
    [
        (x.checked_add(1).filter(|n| *n < dims.width).map(|n| (n, z)), Vec3::X),
        (x.checked_sub(1).map(|n| (n, z)), Vec3::X),
        (z.checked_add(1).filter(|n| *n < dims.depth).map(|n| (x, n)), Vec3::Z),
        (z.checked_sub(1).map(|n| (x, n)), Vec3::Z),
    ]
    .into_iter()
    .filter_map(|(coords, axis)| coords.map(|(nx, nz)| (nx, nz, axis)))
}

/// Accumulate vertical load into `pressure` and split it sideways into
/// `applied_pressure`.
pub fn compute_forces(grid: &mut VoxelGrid, tunables: &Tunables) {
    let dims = grid.dims();
    let h = dims.height as usize;
    let area = grid.cell_size() * grid.cell_size();

    // Overburden plus contact load, carried down from the topmost cell.
    grid.cells_mut().par_chunks_mut(h).for_each(|slots| {
        let mut overburden = 0.0;
        let mut contact = 0.0;
        for cell in slots.iter_mut().rev().filter(|c| c.is_occupied) {
            contact += (-cell.collision_pressure.y).max(0.0);
            let own = cell.total_mass() * GRAVITY / area;
            cell.pressure = Vec3::new(0.0, -(overburden + 0.5 * own + contact), 0.0);
            overburden += own;
        }
    });

    let lateral: Vec<Vec3> = {
        let cells = grid.cells();
        (0..cells.len())
            .into_par_iter()
            .map(|i| lateral_load(cells, dims, i, tunables))
            .collect()
    };

    grid.cells_mut()
        .par_iter_mut()
        .zip(lateral.par_iter())
        .for_each(|(cell, load)| cell.applied_pressure = *load);
}

/// Per-axis lateral stress on cell `i` from load differences with its
/// horizontal neighbours. Open neighbours take the full load; the grid
/// boundary confines.
fn lateral_load(cells: &[Cell], dims: GridDimensions, i: usize, tunables: &Tunables) -> Vec3 {
    let cell = &cells[i];
    let load = -cell.pressure.y;
    if !cell.is_occupied || load <= 0.0 {
        return Vec3::ZERO;
    }

    let c = tunables.compaction;
    let softness = c.k_d_p + c.k_c_p + cell.hardness / REFERENCE_PRESSURE;
    if softness <= 0.0 {
        return Vec3::ZERO;
    }
    let share = LATERAL_SHARE * c.k_d_p / softness;

    let index = cell.grid_index;
    let push = neighbour_coords(index.x, index.z, dims)
        .map(|(x, z, axis)| {
            let neighbour = &cells[GridIndex::new(x, index.y, z).to_linear(dims)];
            let difference = if neighbour.is_occupied {
                load + neighbour.pressure.y
            } else {
                load
            };
            axis * difference.max(0.0)
        })
        .fold(Vec3::ZERO, |acc, p| acc + p);

    // Two neighbours per axis.
    push * (share * 0.5)
}

/// Compact occupied cells under their load and evolve hardness and
/// temperature. Nothing changes when `dt` is zero.
pub fn apply_forces(grid: &mut VoxelGrid, tunables: &Tunables, dt: f32) -> ApplyStats {
    if !(dt > 0.0) {
        return ApplyStats::default();
    }
    let h = grid.dims().height as usize;
    let cs = grid.cell_size();
    let area = cs * cs;
    let relax = (THERMAL_RATE * dt).min(1.0);
    let coeffs = tunables.compaction;

    grid.cells_mut()
        .par_chunks_mut(h)
        .map(|slots| {
            let occupied = slots.iter().filter(|c| c.is_occupied).count();
            let mut stats = ApplyStats::default();

            for (y, cell) in slots.iter_mut().enumerate().filter(|(_, c)| c.is_occupied) {
                let strength = yield_strength(cell, tunables);
                let vertical = strain(-cell.pressure.y, strength, tunables, dt);
                let lateral = strain(cell.applied_pressure.length(), strength, tunables, dt);
                let total = (vertical + lateral).min(MAX_STRAIN_PER_TICK);

                if total > 0.0 && cell.fill > 0.0 {
                    let scale = total / (vertical + lateral);
                    cell.indent_amount = (cell.indent_amount + cell.fill * vertical * scale).min(cs);
                    cell.x_compression_amount =
                        (cell.x_compression_amount + cell.fill * lateral * scale).min(cs);
                    cell.fill *= 1.0 - total;

                    let density = cell.mass / (area * cell.fill);
                    if density > tunables.max_snow_density {
                        let fit = tunables.max_snow_density * area * cell.fill;
                        cell.mass_overflow += cell.mass - fit;
                        cell.mass = fit;
                        cell.density = tunables.max_snow_density;
                        stats.saturated_cells += 1;
                    } else {
                        cell.density = density;
                    }
                    stats.compacted_cells += 1;
                }

                let cold = cold_factor(cell.temperature, tunables);
                let gain = coeffs.h_c_p * REFERENCE_PRESSURE * total * cold;
                let decay = coeffs.h_d_p * HARDNESS_DECAY_RATE * (1.0 - cold) * cell.hardness * dt;
                cell.hardness = (cell.hardness + gain - decay).max(0.0);

                // Linear profile from ground temperature at the base slot to
                // air temperature at the surface.
                let height_fraction = if occupied > 1 {
                    y as f32 / (occupied - 1) as f32
                } else {
                    1.0
                };
                let target = tunables.ground_temperature
                    + (tunables.air_temperature - tunables.ground_temperature) * height_fraction;
                let floor = if y == 0 {
                    tunables.temperature_floor()
                } else {
                    tunables.min_snow_temperature
                };
                cell.temperature = (cell.temperature + (target - cell.temperature) * relax)
                    .clamp(floor, tunables.air_temperature.max(floor));
            }
            stats
        })
        .reduce(ApplyStats::default, ApplyStats::merge)
}

/// Exchange mass between vertically adjacent occupied cells so density and
/// hardness drift towards their neighbours. Fill and column mass are
/// preserved, so column height does not change.
pub fn resample_density(grid: &mut VoxelGrid, tunables: &Tunables, dt: f32) {
    let alpha = (RESAMPLE_RATE * dt).min(1.0);
    if !(alpha > 0.0) {
        return;
    }
    let h = grid.dims().height as usize;
    let area = grid.cell_size() * grid.cell_size();
    let rate = alpha * 0.25;

    grid.cells_mut().par_chunks_mut(h).for_each(|slots| {
        for y in 1..slots.len() {
            let (lower, upper) = slots.split_at_mut(y);
            let (below, above) = (&mut lower[y - 1], &mut upper[0]);
            if !(below.is_occupied && above.is_occupied) || below.fill <= 0.0 || above.fill <= 0.0
            {
                continue;
            }
            let transfer = rate * (below.density - above.density) * area * below.fill.min(above.fill);
            below.mass -= transfer;
            above.mass += transfer;
            below.density = below.mass / (area * below.fill);
            above.density = above.mass / (area * above.fill);

            let hardening = rate * (above.hardness - below.hardness);
            below.hardness += hardening;
            above.hardness -= hardening;
        }

        for cell in slots.iter_mut().filter(|c| c.is_occupied) {
            cell.density = cell
                .density
                .clamp(tunables.fresh_snow_density, tunables.max_snow_density);
        }
    });
}

/// Sum each grid column into its snow height and total mass, then write the
/// result to every texel the grid column covers. Texels outside the grid
/// keep their values.
pub fn aggregate_columns(grid: &VoxelGrid, columns: &mut [ColumnData]) {
    let h = grid.dims().height as usize;
    let sums: Vec<(f32, f32)> = grid
        .cells()
        .par_chunks(h)
        .map(|slots| {
            slots
                .iter()
                .filter(|c| c.is_occupied)
                .fold((0.0, 0.0), |(height, mass), c| {
                    (height + c.fill, mass + c.total_mass())
                })
        })
        .collect();

    let binding = grid.binding();
    columns
        .par_iter_mut()
        .enumerate()
        .for_each(|(texel, column)| match binding.grid_column_of(texel) {
            Some(grid_column) => {
                let (height, mass) = sums[grid_column];
                column.mass_temp = mass;
                column.mass = column.mass_temp;
                column.height = height;
            }
            None => column.mass_temp = column.mass,
        });
}
