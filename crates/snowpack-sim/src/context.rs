//! Simulation context: owns every buffer and drives the tick pipeline.

use glam::Vec3;
use snowpack_core::{
    CellInstance, CollisionData, ColumnData, ColumnIndex, Recovered, Result, SimConfig, Tunables,
};
use snowpack_terrain::{ColumnAggregate, HeightField};
use tracing::{debug, info, trace, warn};

use crate::collision::{ColliderDescriptor, CollisionInjector};
use crate::grid::VoxelGrid;
use crate::pipeline::{run_tick, RecoveredCounts, TickBuffers, TickInputs};
use crate::readback::{ReadbackHandle, ReadbackStatus};
use crate::snapshot::{MassBalance, SimulationSnapshot};

#[cfg(feature = "profiling")]
use snowpack_profiler::{profile_scope, EventCategory};

/// One column as seen from a world-space query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnQuery {
    pub index: ColumnIndex,
    /// The query position fell off the plane and was clamped to its edge.
    pub clamped: bool,
    pub column: ColumnData,
    /// World-space height of the snow surface.
    pub surface_y: f32,
    /// Tick the data was taken after.
    pub tick: u64,
}

/// Owns the simulation state between ticks.
///
/// Create with [`SimulationContext::init`], advance with
/// [`SimulationContext::step`] and release with
/// [`SimulationContext::teardown`] (dropping the context does the same).
pub struct SimulationContext {
    config: SimConfig,
    tunables: Tunables,
    height_field: HeightField,
    columns: ColumnAggregate,
    grid: VoxelGrid,
    injector: CollisionInjector,
    readback: ReadbackHandle,
    tick: u64,
    sim_time: f64,
    /// Column mass at the end of the last tick.
    mass_checkpoint: f64,
    /// Mass deposited since the last tick.
    pending_added: f64,
}

impl SimulationContext {
    /// Validate `config`, generate the ground and allocate every buffer.
    pub fn init(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let height_field = HeightField::new(&config);
        let columns = ColumnAggregate::new(config.resolution, height_field.ground());
        let grid = VoxelGrid::new(&config, height_field.mapping());
        let injector = CollisionInjector::new(*height_field.mapping(), config.cell_size);
        let readback = ReadbackHandle::spawn(config.resolution)?;

        let mut tunables = config.tunables;
        tunables.snow_added_height = height_field.quantize(tunables.snow_added_height);

        info!(
            resolution = config.resolution,
            grid = ?config.grid,
            cell_size = config.cell_size,
            covered_texels = grid.binding().covered_texels(),
            "Simulation initialised"
        );

        Ok(Self {
            config,
            tunables,
            height_field,
            columns,
            grid,
            injector,
            readback,
            tick: 0,
            sim_time: 0.0,
            mass_checkpoint: 0.0,
            pending_added: 0.0,
        })
    }

    /// Advance the simulation by `dt` wall-clock seconds, scaled by the
    /// current time scale. `colliders` replaces last tick's collider list.
    pub fn step(&mut self, dt: f32, colliders: &[ColliderDescriptor]) -> SimulationSnapshot {
        let snapshot = {
            #[cfg(feature = "profiling")]
            profile_scope!(EventCategory::Tick);
            self.advance(dt, colliders)
        };

        #[cfg(feature = "profiling")]
        snowpack_profiler::end_tick(self.tick, self.sim_time);

        snapshot
    }

    fn advance(&mut self, dt: f32, colliders: &[ColliderDescriptor]) -> SimulationSnapshot {
        let mut recovered = RecoveredCounts::default();

        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!(dt, "Invalid time step, treating as zero");
            recovered.add(Recovered::InputClamped, 1);
            0.0
        };
        let dt_sim = dt * self.tunables.time_scale;

        self.readback.poll();
        let readback = self.readback.status();
        if let ReadbackStatus::Stale { age } = readback {
            debug!(age, "Settling colliders against stale readback");
            recovered.add(Recovered::ReadbackStale, 1);
        }
        let settled_colliders = match self.readback.latest() {
            Some(latest) => colliders
                .iter()
                .map(|c| self.injector.settle(c, latest))
                .collect(),
            None => colliders.to_vec(),
        };

        let inject = self.injector.build(colliders);
        recovered.add(Recovered::InputClamped, inject.clamped);
        recovered.add(Recovered::DegenerateGeometry, inject.degenerate);

        let deposit_temperature = self.height_field.deposit_temperature();
        let collisions: &[CollisionData] = if self.injector.has_active() {
            self.injector.buffer()
        } else {
            &[]
        };
        let mut report = run_tick(
            &mut TickBuffers {
                grid: &mut self.grid,
                columns: &mut self.columns,
                height_field: &mut self.height_field,
            },
            &TickInputs {
                tunables: &self.tunables,
                dt_sim,
                collisions,
                deposit_temperature,
            },
        );
        report.recovered.merge(&recovered);

        let mass = MassBalance {
            before: self.mass_checkpoint,
            added: std::mem::take(&mut self.pending_added),
            after: self.columns.total_mass(),
        };
        self.mass_checkpoint = mass.after;

        self.tick += 1;
        self.sim_time += f64::from(dt_sim);

        {
            #[cfg(feature = "profiling")]
            profile_scope!(EventCategory::Readback);
            self.readback.request(self.tick, self.columns.as_slice());
        }

        for (kind, count) in report.recovered.iter() {
            debug!(tick = self.tick, condition = %kind, count, "Recovered condition");
        }
        trace!(
            tick = self.tick,
            occupied = report.occupied_cells,
            compacted = report.compacted_cells,
            collision_cells = report.collision_cells,
            drift = mass.drift(),
            "Tick complete"
        );

        SimulationSnapshot {
            tick: self.tick,
            sim_time: self.sim_time,
            dt_sim,
            report,
            mass,
            max_snow_height: self.columns.max_height(),
            readback,
            settled_colliders,
        }
    }

    /// Stop the readback worker and release every buffer.
    pub fn teardown(mut self) {
        self.readback.shutdown();
        info!(tick = self.tick, sim_time = self.sim_time, "Simulation torn down");
    }

    /// Deposit `amount` metres of fresh snow at air temperature on every
    /// column, rounded down to whole cells. Returns the height actually added.
    pub fn add_snow(&mut self, amount: f32) -> f32 {
        self.add_snow_at(amount, self.tunables.air_temperature)
    }

    /// Like [`Self::add_snow`], with the new snow at `temperature`.
    ///
    /// The temperature is clamped to the snow range.
    pub fn add_snow_at(&mut self, amount: f32, temperature: f32) -> f32 {
        let low = self.tunables.min_snow_temperature;
        let high = self.tunables.air_temperature.max(low);
        let temperature = if temperature.is_nan() {
            high
        } else {
            temperature.clamp(low, high)
        };
        let before = self.columns.total_mass();
        let added = self.height_field.add_snow(
            &mut self.columns,
            amount,
            temperature,
            self.tunables.fresh_snow_density,
        );
        self.pending_added += self.columns.total_mass() - before;
        added
    }

    /// Remove all snow, keeping the ground, the grid state and the clock.
    pub fn clear_snow(&mut self) {
        let before = self.columns.total_mass();
        self.height_field.clear_snow(&mut self.columns);
        self.pending_added -= before;
        info!(removed = before, "Snow cleared");
    }

    /// Deposit the configured `snow_added_height`.
    pub fn add_configured_snow(&mut self) -> f32 {
        self.add_snow(self.tunables.snow_added_height)
    }

    /// Replace the tunables. Takes effect from the next tick.
    pub fn set_tunables(&mut self, tunables: Tunables) -> Result<()> {
        tunables.validate()?;
        let mut tunables = tunables;
        tunables.snow_added_height = self.height_field.quantize(tunables.snow_added_height);
        if tunables.time_scale != self.tunables.time_scale {
            info!(time_scale = tunables.time_scale, "Time scale changed");
        }
        self.tunables = tunables;
        Ok(())
    }

    pub fn set_colliders_enabled(&mut self, enabled: bool) {
        if enabled != self.injector.enabled() {
            info!(enabled, "Collider injection toggled");
        }
        self.injector.set_enabled(enabled);
    }

    #[inline]
    pub fn colliders_enabled(&self) -> bool {
        self.injector.enabled()
    }

    /// Regenerate the ground, drop all snow and restart the clock.
    pub fn reset(&mut self) {
        self.height_field.reset(&mut self.columns);
        self.grid.reset(self.tunables.air_temperature);
        self.injector.clear();
        self.readback.invalidate();
        self.tick = 0;
        self.sim_time = 0.0;
        self.mass_checkpoint = 0.0;
        self.pending_added = 0.0;
        info!("Simulation reset");
    }

    /// Column under a world position from the live buffer.
    pub fn column_at(&self, position: Vec3) -> ColumnQuery {
        let lookup = self.injector.map_world_to_column(position);
        if lookup.clamped {
            debug!(?position, "Column query clamped to plane");
        }
        let column = self.columns.get(lookup.index).copied().unwrap_or_default();
        ColumnQuery {
            index: lookup.index,
            clamped: lookup.clamped,
            column,
            surface_y: self.height_field.mapping().base_y() + column.surface(),
            tick: self.tick,
        }
    }

    /// Column under a world position from the last completed readback, or
    /// `None` before the first one lands.
    pub fn query_column(&self, position: Vec3) -> Option<ColumnQuery> {
        let latest = self.readback.latest()?;
        let lookup = self.injector.map_world_to_column(position);
        let column = latest.get(lookup.index).copied()?;
        Some(ColumnQuery {
            index: lookup.index,
            clamped: lookup.clamped,
            column,
            surface_y: self.height_field.mapping().base_y() + column.surface(),
            tick: latest.tick,
        })
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    #[inline]
    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    #[inline]
    pub fn columns(&self) -> &ColumnAggregate {
        &self.columns
    }

    #[inline]
    pub fn height_field(&self) -> &HeightField {
        &self.height_field
    }

    #[inline]
    pub fn readback(&self) -> &ReadbackHandle {
        &self.readback
    }

    #[inline]
    pub fn readback_mut(&mut self) -> &mut ReadbackHandle {
        &mut self.readback
    }

    #[inline]
    pub fn collision_injector(&self) -> &CollisionInjector {
        &self.injector
    }

    /// Render records for every grid cell.
    pub fn instances(&self) -> Vec<CellInstance> {
        self.grid.instances()
    }

    #[inline]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub const fn sim_time(&self) -> f64 {
        self.sim_time
    }
}
