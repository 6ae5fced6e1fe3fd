//! The bounded cell grid and its binding to the column raster.
//!
//! The grid follows the terrain: slot `y` of a grid column spans
//! `[ground + y * cs, ground + (y + 1) * cs]` above the ground height sampled
//! at that column. Cells are stored column-major so every vertical column is a
//! contiguous slice of `H` cells and can be processed independently.

use glam::{Vec2, Vec3};
use rayon::prelude::*;
use snowpack_core::constants::SLOT_EPSILON;
use snowpack_core::{
    Cell, CellInstance, ColumnData, ColumnIndex, CollisionData, GridDimensions, GridIndex,
    SimConfig, Tunables,
};
use snowpack_terrain::PlaneMapping;

/// Sentinel for texels that lie outside the grid footprint.
const NO_GRID_COLUMN: u32 = u32::MAX;

/// Counters produced by [`VoxelGrid::populate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PopulateStats {
    pub occupied_cells: usize,
    /// Cells whose share of column mass did not fit below max density.
    pub overfull_cells: usize,
}

/// Two-way binding between grid columns and raster texels.
///
/// Each grid column reads the texel nearest its centre; each texel inside the
/// grid footprint receives the aggregate of the grid column containing it.
#[derive(Clone, Debug)]
pub struct ColumnBinding {
    sample_texel: Vec<usize>,
    texel_grid_column: Vec<u32>,
}

impl ColumnBinding {
    fn new(dims: GridDimensions, grid_min: Vec2, cell_size: f32, mapping: &PlaneMapping) -> Self {
        let sample_texel = (0..dims.column_count())
            .map(|column| {
                let (x, z) = dims.column_coords(column);
                let center = grid_min + (Vec2::new(x as f32, z as f32) + 0.5) * cell_size;
                mapping
                    .world_to_column(Vec3::new(center.x, 0.0, center.y))
                    .index
                    .to_linear(mapping.resolution())
            })
            .collect();

        let resolution = mapping.resolution();
        let texels = resolution as usize * resolution as usize;
        let extent = Vec2::new(dims.width as f32, dims.depth as f32);
        let tolerance = 1.0e-3;
        let texel_grid_column = (0..texels)
            .into_par_iter()
            .map(|texel| {
                let center = mapping.column_center(ColumnIndex::from_linear(texel, resolution));
                let local = (center - grid_min) / cell_size;
                if local.x < -tolerance
                    || local.y < -tolerance
                    || local.x > extent.x + tolerance
                    || local.y > extent.y + tolerance
                {
                    return NO_GRID_COLUMN;
                }
                let x = (local.x.floor().max(0.0) as u32).min(dims.width - 1);
                let z = (local.y.floor().max(0.0) as u32).min(dims.depth - 1);
                dims.column_of(x, z) as u32
            })
            .collect();

        Self {
            sample_texel,
            texel_grid_column,
        }
    }

    /// Texel sampled by a grid column.
    #[inline]
    pub fn sample_texel(&self, grid_column: usize) -> usize {
        self.sample_texel[grid_column]
    }

    /// Grid column covering a texel, if the texel lies inside the grid.
    #[inline]
    pub fn grid_column_of(&self, texel: usize) -> Option<usize> {
        match self.texel_grid_column.get(texel) {
            Some(&column) if column != NO_GRID_COLUMN => Some(column as usize),
            _ => None,
        }
    }

    /// Number of texels inside the grid footprint.
    pub fn covered_texels(&self) -> usize {
        self.texel_grid_column
            .iter()
            .filter(|c| **c != NO_GRID_COLUMN)
            .count()
    }
}

/// Number of occupied slots for a column of snow `height` deep.
///
/// The topmost slot absorbs any snow above the grid ceiling.
#[inline]
pub fn occupied_slot_count(height: f32, cell_size: f32, slots: u32) -> usize {
    if !(height > 0.0) {
        return 0;
    }
    let needed = (height / cell_size - SLOT_EPSILON).ceil().max(1.0) as usize;
    needed.min(slots as usize)
}

/// Relative tolerance when matching a column against the grid's last
/// aggregate of it.
const HELD_TOLERANCE: f32 = 1.0e-5;

#[inline]
fn same_amount(column: f32, held: f32) -> bool {
    (column - held).abs() <= HELD_TOLERANCE * column.abs().max(f32::MIN_POSITIVE)
}

/// Per-column populate pass.
struct Stamp<'a> {
    tunables: &'a Tunables,
    area: f32,
    cell_size: f32,
    deposit_temperature: f32,
    stats: PopulateStats,
}

impl Stamp<'_> {
    /// Mark the first `held` slots occupied as they are and empty the rest.
    fn keep(&mut self, slots: &mut [Cell], held: usize) {
        for cell in &mut slots[..held] {
            cell.is_occupied = true;
            self.count(cell);
        }
        for cell in &mut slots[held..] {
            empty(cell);
        }
    }

    /// Lay `height` metres of snow weighing `mass` into `slots` from the
    /// bottom. The last slot absorbs whatever does not fit.
    fn layer(&mut self, slots: &mut [Cell], height: f32, mass: f32) {
        let cs = self.cell_size;
        let occupied = occupied_slot_count(height, cs, slots.len() as u32);
        for (y, cell) in slots.iter_mut().enumerate() {
            if y >= occupied {
                empty(cell);
                continue;
            }

            let fill = if y + 1 == occupied {
                height - (occupied - 1) as f32 * cs
            } else {
                cs
            };
            let share = mass * fill / height;
            let settled = share.min(self.tunables.max_snow_density * self.area * fill);

            if cell.fill <= 0.0 {
                cell.temperature = self.deposit_temperature;
            }
            cell.fill = fill;
            cell.mass = settled;
            cell.mass_overflow = share - settled;
            cell.density = if fill > 0.0 {
                (settled / (self.area * fill)).clamp(
                    self.tunables.fresh_snow_density,
                    self.tunables.max_snow_density,
                )
            } else {
                self.tunables.fresh_snow_density
            };
            cell.is_occupied = true;
            self.count(cell);
        }
    }

    fn count(&mut self, cell: &Cell) {
        self.stats.occupied_cells += 1;
        if cell.mass_overflow > 0.0 {
            self.stats.overfull_cells += 1;
        }
    }
}

fn empty(cell: &mut Cell) {
    cell.density = 0.0;
    cell.mass = 0.0;
    cell.mass_overflow = 0.0;
    cell.fill = 0.0;
    cell.is_occupied = false;
}

/// Fixed-size 3D cell grid.
pub struct VoxelGrid {
    dims: GridDimensions,
    cell_size: f32,
    grid_min: Vec2,
    base_y: f32,
    cells: Vec<Cell>,
    binding: ColumnBinding,
}

impl VoxelGrid {
    /// Build an empty grid placed according to `config`.
    pub fn new(config: &SimConfig, mapping: &PlaneMapping) -> Self {
        let dims = config.grid;
        let grid_min = config.grid_center - config.grid_extent() * 0.5;
        let binding = ColumnBinding::new(dims, grid_min, config.cell_size, mapping);
        let temperature = config.tunables.air_temperature;
        let cells = (0..dims.cell_count())
            .map(|i| Cell::new(GridIndex::from_linear(i, dims), i as u32, temperature))
            .collect();

        Self {
            dims,
            cell_size: config.cell_size,
            grid_min,
            base_y: mapping.base_y(),
            cells,
            binding,
        }
    }

    #[inline]
    pub const fn dims(&self) -> GridDimensions {
        self.dims
    }

    #[inline]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn binding(&self) -> &ColumnBinding {
        &self.binding
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[inline]
    pub(crate) fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    #[inline]
    pub fn cell(&self, index: GridIndex) -> Option<&Cell> {
        if !self.dims.contains(index) {
            return None;
        }
        self.cells.get(index.to_linear(self.dims))
    }

    /// The `H` cells of one vertical grid column, bottom first.
    pub fn column_cells(&self, x: u32, z: u32) -> &[Cell] {
        let h = self.dims.height as usize;
        let start = self.dims.column_of(x, z) * h;
        &self.cells[start..start + h]
    }

    /// Centre of a grid column in world XZ.
    #[inline]
    pub fn column_center(&self, x: u32, z: u32) -> Vec2 {
        self.grid_min + (Vec2::new(x as f32, z as f32) + 0.5) * self.cell_size
    }

    /// Grid column containing a world position, if inside the footprint.
    pub fn grid_column_at(&self, position: Vec3) -> Option<usize> {
        let local = (Vec2::new(position.x, position.z) - self.grid_min) / self.cell_size;
        if !(local.x >= 0.0 && local.y >= 0.0) {
            return None;
        }
        let (x, z) = (local.x.floor() as u32, local.y.floor() as u32);
        (x < self.dims.width && z < self.dims.depth).then(|| self.dims.column_of(x, z))
    }

    /// Fill the grid from the column raster.
    ///
    /// A grid column whose height and mass still match what the grid last
    /// aggregated keeps its per-slot state, so compaction and resampling carry
    /// over between ticks. Fresh snow on top of existing slots is stacked above
    /// them. Anything else is rebuilt: full slots of `cell_size` plus one
    /// partial top slot, mass shared in proportion to fill.
    ///
    /// Mass that does not fit below `max_snow_density` is carried as overflow.
    /// Cells that become occupied take `deposit_temperature`; cells that stay
    /// occupied keep their thermal and hardness history.
    pub fn populate(
        &mut self,
        columns: &[ColumnData],
        tunables: &Tunables,
        deposit_temperature: f32,
    ) -> PopulateStats {
        let h = self.dims.height as usize;
        let dims = self.dims;
        let cs = self.cell_size;
        let base_y = self.base_y;
        let grid_min = self.grid_min;
        let binding = &self.binding;

        self.cells
            .par_chunks_mut(h)
            .enumerate()
            .map(|(grid_column, slots)| {
                let column = columns[binding.sample_texel(grid_column)];
                let (x, z) = dims.column_coords(grid_column);
                let center = grid_min + (Vec2::new(x as f32, z as f32) + 0.5) * cs;
                for (y, cell) in slots.iter_mut().enumerate() {
                    cell.world_position = Vec3::new(
                        center.x,
                        base_y + column.ground_height + (y as f32 + 0.5) * cs,
                        center.y,
                    );
                }

                let depth = column.height.max(0.0);
                let held = slots.iter().take_while(|c| c.fill > 0.0).count();
                let (held_height, held_mass) = slots[..held]
                    .iter()
                    .fold((0.0_f32, 0.0_f32), |(height, mass), c| {
                        (height + c.fill, mass + c.total_mass())
                    });

                let mut stamp = Stamp {
                    tunables,
                    area: cs * cs,
                    cell_size: cs,
                    deposit_temperature,
                    stats: PopulateStats::default(),
                };
                if held > 0 && same_amount(depth, held_height) && same_amount(column.mass, held_mass)
                {
                    stamp.keep(slots, held);
                } else if held > 0
                    && held < h
                    && depth > held_height
                    && column.mass >= held_mass
                {
                    stamp.keep(slots, held);
                    stamp.layer(&mut slots[held..], depth - held_height, column.mass - held_mass);
                } else {
                    stamp.layer(slots, depth, column.mass);
                }
                stamp.stats
            })
            .reduce(PopulateStats::default, |a, b| PopulateStats {
                occupied_cells: a.occupied_cells + b.occupied_cells,
                overfull_cells: a.overfull_cells + b.overfull_cells,
            })
    }

    /// Add collision pressure to the topmost occupied cell of each grid
    /// column hit by an entry. Returns the number of entries that landed
    /// outside the grid footprint.
    pub fn inject_pressure(&mut self, entries: &[CollisionData]) -> usize {
        let mut loads = vec![Vec3::ZERO; self.dims.column_count()];
        let mut outside = 0;
        for entry in entries {
            match self.grid_column_at(entry.position) {
                Some(column) => loads[column] += entry.pressure,
                None => outside += 1,
            }
        }

        let h = self.dims.height as usize;
        self.cells
            .par_chunks_mut(h)
            .zip(loads.par_iter())
            .filter(|(_, load)| **load != Vec3::ZERO)
            .for_each(|(slots, load)| {
                if let Some(top) = slots.iter_mut().rev().find(|c| c.is_occupied) {
                    top.collision_pressure += *load;
                }
            });

        outside
    }

    /// Reset per-tick transient state. Mass, fill and history survive.
    pub fn clear_transient(&mut self) {
        self.cells.par_iter_mut().for_each(Cell::clear_transient);
    }

    /// Drop all snow and history, returning every cell to its initial state.
    pub fn reset(&mut self, temperature: f32) {
        let dims = self.dims;
        self.cells.par_iter_mut().enumerate().for_each(|(i, cell)| {
            *cell = Cell::new(GridIndex::from_linear(i, dims), i as u32, temperature);
        });
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.par_iter().filter(|c| c.is_occupied).count()
    }

    /// Total settled and overflow mass held by the grid.
    pub fn mass_totals(&self) -> (f64, f64) {
        self.cells
            .par_iter()
            .map(|c| (f64::from(c.mass), f64::from(c.mass_overflow)))
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1))
    }

    /// Render records for every cell.
    pub fn instances(&self) -> Vec<CellInstance> {
        self.cells.par_iter().map(Cell::to_instance).collect()
    }

    /// Render records packed for an instance-buffer upload.
    pub fn instance_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.instances()).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use snowpack_core::GroundConfig;
    use snowpack_terrain::{ColumnAggregate, HeightField};

    fn small_config() -> SimConfig {
        SimConfig::default()
            .with_resolution(64)
            .with_grid(GridDimensions::cube(10), 0.2)
            .with_plane(Vec3::ZERO, 2.0)
            .with_ground(GroundConfig {
                amplitude: 0.0,
                ..GroundConfig::default()
            })
    }

    fn setup(snow: f32) -> (SimConfig, VoxelGrid, ColumnAggregate) {
        let config = small_config();
        let mut field = HeightField::new(&config);
        let mut columns = ColumnAggregate::new(config.resolution, field.ground());
        field.add_snow(&mut columns, snow, -3.0, config.tunables.fresh_snow_density);
        let grid = VoxelGrid::new(&config, field.mapping());
        (config, grid, columns)
    }

    #[test]
    fn slot_count_rounds_up_partial_slots() {
        assert_eq!(occupied_slot_count(0.0, 0.2, 10), 0);
        assert_eq!(occupied_slot_count(0.4, 0.2, 10), 2);
        assert_eq!(occupied_slot_count(0.39999998, 0.2, 10), 2);
        assert_eq!(occupied_slot_count(0.40000004, 0.2, 10), 2);
        assert_eq!(occupied_slot_count(0.45, 0.2, 10), 3);
        assert_eq!(occupied_slot_count(50.0, 0.2, 10), 10);
        assert_eq!(occupied_slot_count(f32::NAN, 0.2, 10), 0);
    }

    #[test]
    fn populate_fills_slots_from_column_height() {
        let (config, mut grid, columns) = setup(0.4);
        let stats = grid.populate(columns.as_slice(), &config.tunables, -3.0);

        assert_eq!(stats.occupied_cells, 2 * 100);
        assert_eq!(stats.overfull_cells, 0);
        let column = grid.column_cells(3, 4);
        assert!(column[0].is_occupied && column[1].is_occupied);
        assert!(!column[2].is_occupied);
        assert_relative_eq!(column[0].density, 20.0, epsilon = 1e-3);
        assert_relative_eq!(column[1].fill, 0.2, epsilon = 1e-5);
        assert_eq!(column[2].density, 0.0);
        assert_relative_eq!(column[1].world_position.y, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn populate_is_idempotent_for_occupancy() {
        let (config, mut grid, columns) = setup(0.6);
        grid.populate(columns.as_slice(), &config.tunables, -3.0);
        let first: Vec<bool> = grid.cells().iter().map(|c| c.is_occupied).collect();
        grid.populate(columns.as_slice(), &config.tunables, -3.0);
        let second: Vec<bool> = grid.cells().iter().map(|c| c.is_occupied).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn populate_conserves_column_mass() {
        let (config, mut grid, mut columns) = setup(0.4);
        // Pack more mass than fits below max density.
        for c in columns.as_mut_slice() {
            c.mass = 0.4 * 0.04 * 150.0;
        }
        let stats = grid.populate(columns.as_slice(), &config.tunables, -3.0);
        assert!(stats.overfull_cells > 0);

        let (settled, overflow) = grid.mass_totals();
        let expected = 100.0 * f64::from(0.4_f32 * 0.04 * 150.0);
        assert_relative_eq!(settled + overflow, expected, max_relative = 1e-5);
        assert!(grid
            .cells()
            .iter()
            .filter(|c| c.is_occupied)
            .all(|c| c.density <= config.tunables.max_snow_density));
    }

    #[test]
    fn new_cells_take_deposit_temperature() {
        let (config, mut grid, columns) = setup(0.2);
        grid.populate(columns.as_slice(), &config.tunables, -8.0);
        assert_eq!(grid.column_cells(0, 0)[0].temperature, -8.0);

        // Existing snow keeps its temperature on later passes.
        grid.populate(columns.as_slice(), &config.tunables, -1.0);
        assert_eq!(grid.column_cells(0, 0)[0].temperature, -8.0);
    }

    #[test]
    fn snow_above_ceiling_goes_to_top_slot() {
        let (config, mut grid, columns) = setup(2.6);
        grid.populate(columns.as_slice(), &config.tunables, -3.0);
        let column = grid.column_cells(1, 1);
        assert!(column.iter().all(|c| c.is_occupied));
        assert_relative_eq!(column[9].fill, 2.6 - 9.0 * 0.2, epsilon = 1e-4);
    }

    #[test]
    fn binding_covers_grid_footprint() {
        let (config, grid, _) = setup(0.0);
        let binding = grid.binding();
        let r = config.resolution;
        // Grid and plane coincide, so every texel is covered.
        assert_eq!(binding.covered_texels(), (r * r) as usize);
        for column in 0..grid.dims().column_count() {
            let texel = binding.sample_texel(column);
            assert_eq!(binding.grid_column_of(texel), Some(column));
        }
    }

    #[test]
    fn injected_pressure_lands_on_top_cell() {
        let (config, mut grid, columns) = setup(0.6);
        grid.populate(columns.as_slice(), &config.tunables, -3.0);
        let center = grid.column_center(2, 5);
        let entries = [
            CollisionData {
                position: Vec3::new(center.x, 0.0, center.y),
                pressure: Vec3::NEG_Y * 100.0,
            },
            CollisionData {
                position: Vec3::new(center.x, 0.0, center.y),
                pressure: Vec3::NEG_Y * 50.0,
            },
            CollisionData {
                position: Vec3::new(40.0, 0.0, 0.0),
                pressure: Vec3::NEG_Y,
            },
        ];

        let outside = grid.inject_pressure(&entries);

        assert_eq!(outside, 1);
        let column = grid.column_cells(2, 5);
        assert_relative_eq!(column[2].collision_pressure.y, -150.0);
        assert_eq!(column[1].collision_pressure, Vec3::ZERO);
    }

    #[test]
    fn clear_transient_keeps_mass() {
        let (config, mut grid, columns) = setup(0.4);
        grid.populate(columns.as_slice(), &config.tunables, -3.0);
        let (before, _) = grid.mass_totals();
        grid.clear_transient();
        assert_eq!(grid.occupied_count(), 0);
        assert_relative_eq!(grid.mass_totals().0, before);
    }
}
