//! Whole-pipeline ticks through the public context.

use std::time::Duration;

use approx::assert_relative_eq;
use glam::Vec3;
use snowpack_core::{ColumnIndex, GridDimensions, GroundConfig, Recovered, SimConfig, Tunables};

use crate::{ColliderDescriptor, ReadbackStatus, SimulationContext, StageFlags, VoxelGrid};

const DT: f32 = 0.1;

fn small_config(time_scale: f32) -> SimConfig {
    SimConfig::default()
        .with_resolution(128)
        .with_grid(GridDimensions::cube(20), 0.2)
        .with_plane(Vec3::ZERO, 4.0)
        .with_time_scale(time_scale)
}

fn flat(config: SimConfig) -> SimConfig {
    config.with_ground(GroundConfig {
        amplitude: 0.0,
        ..GroundConfig::default()
    })
}

/// 70 kg box with a 0.4 m square footprint centred on the plane.
fn boot() -> ColliderDescriptor {
    ColliderDescriptor::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.4, 0.3, 0.4), 70.0)
}

/// Settled mass over snow volume for one grid column.
fn column_density(grid: &VoxelGrid, x: u32, z: u32) -> f64 {
    let area = f64::from(grid.cell_size() * grid.cell_size());
    let (mass, volume) = grid
        .column_cells(x, z)
        .iter()
        .filter(|c| c.fill > 0.0)
        .fold((0.0, 0.0), |(m, v), c| {
            (m + f64::from(c.mass), v + f64::from(c.fill) * area)
        });
    mass / volume
}

fn column_overflow(grid: &VoxelGrid, x: u32, z: u32) -> f32 {
    grid.column_cells(x, z).iter().map(|c| c.mass_overflow).sum()
}

#[test]
fn fresh_snow_holds_on_full_raster() {
    let config = SimConfig::default().with_time_scale(1.0);
    let mut ctx = SimulationContext::init(config).unwrap();

    assert_relative_eq!(ctx.add_snow(0.4), 0.4, epsilon = 1e-6);
    let snapshot = ctx.step(1.0 / 60.0, &[]);

    let column = ctx.columns().get(ColumnIndex::new(512, 512)).unwrap();
    assert_relative_eq!(column.height, 0.4, epsilon = 1e-4);
    assert_relative_eq!(column.mass, 0.4 * 0.04 * 20.0, max_relative = 1e-4);

    assert_eq!(snapshot.report.compacted_cells, 0);
    assert!(snapshot.report.skipped.contains(StageFlags::INJECT_PRESSURE));
    assert_eq!(snapshot.report.occupied_cells, 2 * 50 * 50);
    assert!(snapshot.mass.relative_drift().abs() < 1e-5);
    assert!(ctx
        .grid()
        .cells()
        .iter()
        .filter(|c| c.fill > 0.0)
        .all(|c| (c.density - 20.0).abs() < 1e-3 && c.applied_pressure == Vec3::ZERO));

    ctx.readback_mut().wait_for(1, Duration::from_secs(30)).unwrap();
    let query = ctx.query_column(Vec3::ZERO).unwrap();
    assert_eq!(query.index, ColumnIndex::new(512, 512));
    assert_eq!(query.tick, 1);
    assert_relative_eq!(query.column.height, 0.4, epsilon = 1e-4);
    ctx.teardown();
}

#[test]
fn collider_compacts_until_saturation() {
    let config = small_config(1.0);
    let max = f64::from(config.tunables.max_snow_density);
    let mut ctx = SimulationContext::init(config).unwrap();
    ctx.add_snow(0.4);

    let mut previous = 0.0;
    let mut saturated = false;
    let mut overflowed = false;
    for _ in 0..300 {
        let snapshot = ctx.step(DT, &[boot()]);
        assert!(snapshot.report.executed.contains(StageFlags::INJECT_PRESSURE));

        // The footprint covers grid columns 9 and 10 on both axes.
        let density = column_density(ctx.grid(), 10, 10);
        if saturated {
            assert_relative_eq!(density, max, max_relative = 1e-4);
        } else {
            assert!(density > previous, "density fell from {previous} to {density}");
            saturated = density >= max * (1.0 - 1e-4);
        }
        previous = density;

        if saturated && column_overflow(ctx.grid(), 10, 10) > 0.0 {
            overflowed = true;
            break;
        }
    }
    assert!(saturated, "column never reached max density");
    assert!(overflowed, "saturated column never overflowed");

    // Columns outside the footprint keep their fresh snow.
    assert_relative_eq!(column_density(ctx.grid(), 2, 2), 20.0, max_relative = 1e-3);
}

#[test]
fn zero_time_scale_freezes_state() {
    let mut ctx = SimulationContext::init(small_config(0.0)).unwrap();
    ctx.add_snow(0.6);

    let first = ctx.step(DT, &[boot()]);
    assert_eq!(first.report.compacted_cells, 0);
    let cells = ctx.grid().cells().to_vec();
    let columns = ctx.columns().as_slice().to_vec();

    for _ in 0..5 {
        let snapshot = ctx.step(DT, &[boot()]);
        assert_eq!(snapshot.sim_time, 0.0);
        assert_eq!(snapshot.report.compacted_cells, 0);
    }

    for (before, after) in cells.iter().zip(ctx.grid().cells()) {
        assert_eq!(before.fill > 0.0, after.fill > 0.0);
        assert_relative_eq!(before.density, after.density, max_relative = 1e-5);
        assert_relative_eq!(before.mass, after.mass, max_relative = 1e-5);
        assert_relative_eq!(before.fill, after.fill, max_relative = 1e-5);
        assert_eq!(before.hardness, after.hardness);
        assert_eq!(before.temperature, after.temperature);
        assert_eq!(before.indent_amount, after.indent_amount);
    }
    for (before, after) in columns.iter().zip(ctx.columns().as_slice()) {
        assert_relative_eq!(before.height, after.height, max_relative = 1e-5);
        assert_relative_eq!(before.mass, after.mass, max_relative = 1e-5);
    }
}

#[test]
fn compacted_snow_freezes_when_time_stops() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    ctx.add_snow(0.6);
    for _ in 0..5 {
        ctx.step(DT, &[boot()]);
    }
    let slots = ctx.grid().column_cells(10, 10);
    assert!(slots[0].density > 20.0);
    assert_ne!(slots[0].fill, slots[1].fill);

    let mut tunables = *ctx.tunables();
    tunables.time_scale = 0.0;
    ctx.set_tunables(tunables).unwrap();
    let cells = ctx.grid().cells().to_vec();
    let columns = ctx.columns().as_slice().to_vec();

    for _ in 0..3 {
        let snapshot = ctx.step(DT, &[boot()]);
        assert_eq!(snapshot.report.compacted_cells, 0);
    }

    for (before, after) in cells.iter().zip(ctx.grid().cells()) {
        assert_eq!(before.density, after.density);
        assert_eq!(before.fill, after.fill);
        assert_eq!(before.mass, after.mass);
        assert_eq!(before.mass_overflow, after.mass_overflow);
        assert_eq!(before.indent_amount, after.indent_amount);
        assert_eq!(before.hardness, after.hardness);
        assert_eq!(before.temperature, after.temperature);
        assert_eq!(before.grain_size, after.grain_size);
    }
    for (before, after) in columns.iter().zip(ctx.columns().as_slice()) {
        assert_eq!(before.height, after.height);
        assert_eq!(before.mass, after.mass);
    }
}

#[test]
fn fresh_snow_settles_on_top_of_tracks() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    ctx.add_snow(0.4);
    for _ in 0..5 {
        ctx.step(DT, &[boot()]);
    }
    let track: Vec<_> = ctx.grid().column_cells(10, 10)[..2].to_vec();
    let height = ctx.grid().column_cells(10, 10)[..2]
        .iter()
        .map(|c| c.fill)
        .sum::<f32>();

    ctx.add_snow_at(0.2, -12.0);
    let mut tunables = *ctx.tunables();
    tunables.time_scale = 0.0;
    ctx.set_tunables(tunables).unwrap();
    let snapshot = ctx.step(DT, &[]);
    assert!(snapshot.mass.relative_drift().abs() < 1e-5);

    let slots = ctx.grid().column_cells(10, 10);
    for (before, after) in track.iter().zip(slots) {
        assert_eq!(before.density, after.density);
        assert_eq!(before.fill, after.fill);
        assert_eq!(before.temperature, after.temperature);
    }
    assert_relative_eq!(slots[2].fill, 0.2, epsilon = 1e-5);
    assert_relative_eq!(slots[2].density, 20.0, epsilon = 1e-3);
    assert_eq!(slots[2].temperature, -12.0);
    assert_eq!(slots[3].fill, 0.0);
    let stacked: f32 = slots.iter().map(|c| c.fill).sum();
    assert_relative_eq!(stacked, height + 0.2, epsilon = 1e-5);
}

#[test]
fn deposit_temperature_is_clamped_to_snow_range() {
    let mut ctx = SimulationContext::init(small_config(0.0)).unwrap();
    let tunables = *ctx.tunables();
    ctx.add_snow_at(0.2, 15.0);
    ctx.step(DT, &[]);
    assert_eq!(ctx.grid().column_cells(3, 3)[0].temperature, tunables.air_temperature);

    ctx.reset();
    ctx.add_snow_at(0.2, -80.0);
    ctx.step(DT, &[]);
    assert_eq!(
        ctx.grid().column_cells(3, 3)[0].temperature,
        tunables.min_snow_temperature
    );
}

#[test]
fn mass_is_conserved_under_load() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    ctx.add_snow(0.6);
    let heavy = ColliderDescriptor::from_center_size(
        Vec3::new(0.7, 1.0, -0.5),
        Vec3::new(0.6, 0.3, 0.6),
        400.0,
    );

    for tick in 0..60 {
        if tick == 20 {
            ctx.add_snow(0.2);
        }
        let snapshot = ctx.step(DT, &[boot(), heavy]);
        assert!(
            snapshot.mass.relative_drift().abs() < 1e-4,
            "tick {tick}: {:?}",
            snapshot.mass
        );
        let grid_in = snapshot.report.grid_mass_in;
        assert!(snapshot.report.grid_drift().abs() <= grid_in * 1e-5);
    }
}

#[test]
fn density_stays_within_bounds() {
    let config = small_config(1.0);
    let Tunables {
        fresh_snow_density: fresh,
        max_snow_density: max,
        ..
    } = config.tunables;
    let mut ctx = SimulationContext::init(config).unwrap();
    ctx.add_snow(1.0);
    let crusher = ColliderDescriptor::from_center_size(Vec3::ZERO, Vec3::new(1.0, 0.5, 1.0), 5000.0);

    for _ in 0..40 {
        ctx.step(DT, &[crusher]);
        for cell in ctx.grid().cells().iter().filter(|c| c.fill > 0.0) {
            assert!(cell.density >= fresh - 1e-3 && cell.density <= max + 1e-3);
            assert!(cell.indent_amount <= 0.2 + 1e-6);
            assert!(cell.hardness >= 0.0);
        }
    }
}

#[test]
fn disabled_colliders_skip_injection() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    ctx.add_snow(0.4);
    ctx.set_colliders_enabled(false);
    assert!(!ctx.colliders_enabled());

    let snapshot = ctx.step(DT, &[boot()]);

    assert!(snapshot.report.skipped.contains(StageFlags::INJECT_PRESSURE));
    assert_eq!(snapshot.report.collision_cells, 0);
    assert_eq!(snapshot.report.compacted_cells, 0);

    ctx.set_colliders_enabled(true);
    let snapshot = ctx.step(DT, &[boot()]);
    assert_eq!(snapshot.report.collision_cells, 4);
    assert!(snapshot.report.compacted_cells > 0);
}

#[test]
fn bad_inputs_are_recovered() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    ctx.add_snow(0.4);
    let flat_box = ColliderDescriptor::from_center_size(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.4), 5.0);
    let off_plane = ColliderDescriptor::from_center_size(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.4, 0.2, 0.2), 5.0);

    let snapshot = ctx.step(f32::NAN, &[flat_box, off_plane]);

    let recovered = snapshot.report.recovered;
    assert_eq!(recovered.get(Recovered::DegenerateGeometry), 1);
    // One clamped footprint cell plus the invalid time step.
    assert_eq!(recovered.get(Recovered::InputClamped), 2);
    assert_eq!(snapshot.sim_time, 0.0);
    assert_eq!(snapshot.dt_sim, 0.0);
}

#[test]
fn colliders_settle_on_read_back_surface() {
    let mut ctx = SimulationContext::init(flat(small_config(0.0))).unwrap();
    ctx.add_snow(0.4);

    let first = ctx.step(DT, &[boot()]);
    assert_eq!(first.readback, ReadbackStatus::Empty);
    assert_eq!(first.settled_colliders[0], boot());

    ctx.readback_mut().wait_for(1, Duration::from_secs(10)).unwrap();
    let second = ctx.step(DT, &[boot()]);

    assert_eq!(second.readback, ReadbackStatus::Current);
    assert_relative_eq!(second.settled_colliders[0].bounds.min.y, 0.4, epsilon = 1e-4);
    let query = ctx.query_column(Vec3::new(0.5, 0.0, 0.5)).unwrap();
    assert_relative_eq!(query.surface_y, 0.4, epsilon = 1e-4);
}

#[test]
fn queries_clamp_to_plane() {
    let mut ctx = SimulationContext::init(small_config(0.0)).unwrap();
    ctx.add_snow(0.2);
    ctx.step(DT, &[]);

    let inside = ctx.column_at(Vec3::new(0.3, 5.0, -0.3));
    assert!(!inside.clamped);
    assert_relative_eq!(inside.column.height, 0.2, epsilon = 1e-4);

    let outside = ctx.column_at(Vec3::new(50.0, 0.0, 0.0));
    assert!(outside.clamped);
    assert_eq!(outside.index.x, 127);
}

#[test]
fn sim_time_follows_time_scale() {
    let mut ctx = SimulationContext::init(small_config(0.5)).unwrap();
    for _ in 0..4 {
        ctx.step(DT, &[]);
    }
    assert_eq!(ctx.tick(), 4);
    assert_relative_eq!(ctx.sim_time(), 0.2, epsilon = 1e-6);

    let mut tunables = *ctx.tunables();
    tunables.time_scale = 0.0;
    ctx.set_tunables(tunables).unwrap();
    let snapshot = ctx.step(DT, &[]);
    assert_relative_eq!(snapshot.sim_time, 0.2, epsilon = 1e-6);
}

#[test]
fn tunables_are_validated_and_quantised() {
    let mut ctx = SimulationContext::init(small_config(0.0)).unwrap();

    let mut bad = *ctx.tunables();
    bad.max_snow_density = bad.fresh_snow_density - 1.0;
    assert!(ctx.set_tunables(bad).is_err());

    let mut tunables = *ctx.tunables();
    tunables.snow_added_height = 0.55;
    ctx.set_tunables(tunables).unwrap();
    assert_relative_eq!(ctx.tunables().snow_added_height, 0.4, epsilon = 1e-6);
    assert_relative_eq!(ctx.add_configured_snow(), 0.4, epsilon = 1e-6);
}

#[test]
fn clear_snow_keeps_ground_and_clock() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    let ground = ctx.height_field().ground().to_vec();
    ctx.add_snow(0.6);
    ctx.step(DT, &[boot()]);

    ctx.clear_snow();
    let snapshot = ctx.step(DT, &[]);

    assert_eq!(snapshot.tick, 2);
    assert_eq!(ctx.columns().total_mass(), 0.0);
    assert_eq!(snapshot.report.occupied_cells, 0);
    assert!(ctx.grid().cells().iter().all(|c| c.fill == 0.0 && c.mass == 0.0));
    assert!(snapshot.mass.drift().abs() < 1e-3);
    assert_eq!(ctx.height_field().ground(), ground.as_slice());
}

#[test]
fn reset_clears_snow_and_clock() {
    let mut ctx = SimulationContext::init(small_config(1.0)).unwrap();
    let ground = ctx.height_field().ground().to_vec();
    ctx.add_snow(0.6);
    ctx.step(DT, &[boot()]);
    ctx.step(DT, &[boot()]);

    ctx.reset();

    assert_eq!(ctx.tick(), 0);
    assert_eq!(ctx.sim_time(), 0.0);
    assert_eq!(ctx.columns().total_mass(), 0.0);
    assert!(ctx.readback().latest().is_none());
    assert_eq!(ctx.height_field().ground(), ground.as_slice());
    assert!(ctx.grid().cells().iter().all(|c| c.mass == 0.0 && c.hardness == 0.0));

    let snapshot = ctx.step(DT, &[]);
    assert_eq!(snapshot.tick, 1);
    assert_eq!(snapshot.report.occupied_cells, 0);
}

#[test]
fn instances_cover_every_cell() {
    let mut ctx = SimulationContext::init(small_config(0.0)).unwrap();
    ctx.add_snow(0.4);
    ctx.step(DT, &[]);

    let instances = ctx.instances();
    assert_eq!(instances.len(), 20 * 20 * 20);
    let occupied = instances.iter().filter(|i| i.occupied == 1).count();
    assert_eq!(occupied, 2 * 20 * 20);
    assert_eq!(
        ctx.grid().instance_bytes().len(),
        instances.len() * std::mem::size_of::<snowpack_core::CellInstance>()
    );
}

#[test]
fn invalid_config_is_rejected() {
    let config = small_config(0.0).with_resolution(8);
    assert!(SimulationContext::init(config).is_err());
}
