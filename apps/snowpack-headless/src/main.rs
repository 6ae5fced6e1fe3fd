//! Headless snowpack scenario runner.
//!
//! Deposits fresh snow on a generated ground, drops a box collider on the
//! middle of the grid and steps the simulation for a fixed number of ticks,
//! logging the compaction under the collider and the mass balance.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p snowpack-headless --release -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--ticks <N>`: Number of ticks to run (default: 120)
//! - `--dt <SECONDS>`: Wall-clock step per tick (default: 0.016)
//! - `--time-scale <X>`: Simulated seconds per wall-clock second (default: 1.0)
//! - `--snow <METRES>`: Snow deposited before the first tick (default: 0.4)
//! - `--collider-mass <KG>`: Mass of the box collider (default: 70)
//! - `--resolution <N>`: Height-field resolution (default: 1024)
//! - `--no-collider`: Run without the collider
//! - `-h, --help`: Print help
//!
//! ## Examples
//!
//! ```bash
//! # Default scenario
//! cargo run -p snowpack-headless --release
//!
//! # Heavier load, ten times faster simulated time
//! cargo run -p snowpack-headless --release -- --collider-mass 200 --time-scale 10
//!
//! # Per-stage timings
//! cargo run -p snowpack-headless --release --features profiling
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use glam::Vec3;
use snowpack_core::SimConfig;
use snowpack_sim::{ColliderDescriptor, RecoveredCounts, SimulationContext, SimulationSnapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Footprint of the default collider, roughly a boot.
const COLLIDER_SIZE: Vec3 = Vec3::new(0.4, 0.3, 0.4);

/// Scenario parameters (from CLI or defaults).
#[derive(Debug, Clone)]
struct HeadlessOptions {
    ticks: u64,
    dt: f32,
    time_scale: f32,
    snow: f32,
    collider_mass: f32,
    resolution: u32,
    collider: bool,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            ticks: 120,
            dt: 0.016,
            time_scale: 1.0,
            snow: 0.4,
            collider_mass: 70.0,
            resolution: 1024,
            collider: true,
        }
    }
}

impl HeadlessOptions {
    /// Parse scenario parameters from command line arguments.
    fn from_args() -> Self {
        let mut options = Self::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--ticks" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.ticks = v;
                            i += 1;
                        }
                    }
                }
                "--dt" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.dt = v;
                            i += 1;
                        }
                    }
                }
                "--time-scale" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.time_scale = v;
                            i += 1;
                        }
                    }
                }
                "--snow" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.snow = v;
                            i += 1;
                        }
                    }
                }
                "--collider-mass" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.collider_mass = v;
                            i += 1;
                        }
                    }
                }
                "--resolution" => {
                    if i + 1 < args.len() {
                        if let Ok(v) = args[i + 1].parse() {
                            options.resolution = v;
                            i += 1;
                        }
                    }
                }
                "--no-collider" => options.collider = false,
                _ => {}
            }
            i += 1;
        }

        options
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    #[cfg(feature = "profiling")]
    snowpack_profiler::init();

    let options = HeadlessOptions::from_args();
    info!(?options, "Starting headless scenario");

    let config = SimConfig::default()
        .with_resolution(options.resolution)
        .with_time_scale(options.time_scale);
    let mut ctx = SimulationContext::init(config)?;

    let added = ctx.add_snow(options.snow);
    info!(requested = options.snow, added, "Snow deposited");

    let center = ctx.column_at(Vec3::ZERO);
    let mut colliders = if options.collider {
        let bottom = center.surface_y;
        vec![ColliderDescriptor::from_center_size(
            Vec3::new(0.0, bottom + COLLIDER_SIZE.y * 0.5, 0.0),
            COLLIDER_SIZE,
            options.collider_mass,
        )]
    } else {
        Vec::new()
    };

    let mut last = SimulationSnapshot::default();
    let mut drift = 0.0_f64;
    let mut recovered = RecoveredCounts::default();
    for _ in 0..options.ticks {
        last = ctx.step(options.dt, &colliders);
        drift += last.mass.drift();
        recovered.merge(&last.report.recovered);
        if !last.settled_colliders.is_empty() {
            colliders.clone_from(&last.settled_colliders);
        }
    }

    let under = ctx.column_at(Vec3::ZERO);
    info!(
        ticks = last.tick,
        sim_time = last.sim_time,
        max_snow_height = last.max_snow_height,
        total_mass = ctx.columns().total_mass(),
        accumulated_drift = drift,
        "Scenario complete"
    );
    info!(
        height_before = center.column.height,
        height_after = under.column.height,
        mass = under.column.mass,
        surface_y = under.surface_y,
        "Column under collider"
    );
    for (kind, count) in recovered.iter() {
        info!(condition = %kind, count, "Recovered conditions");
    }

    #[cfg(feature = "profiling")]
    log_profile();

    ctx.teardown();

    #[cfg(feature = "profiling")]
    snowpack_profiler::shutdown();

    Ok(())
}

#[cfg(feature = "profiling")]
fn log_profile() {
    let snapshot = snowpack_profiler::snapshot();
    for stats in &snapshot.categories {
        info!(
            stage = stats.category.name(),
            count = stats.count,
            avg_ms = stats.avg_ms(),
            p95_ms = stats.p95_ms(),
            max_ms = stats.max_ms(),
            "Stage timing"
        );
    }
}

fn print_help() {
    eprintln!(
        "Snowpack headless scenario runner

USAGE:
    cargo run -p snowpack-headless --release -- [OPTIONS]

SCENARIO OPTIONS:
    --ticks <N>             Number of ticks to run (default: 120)
    --dt <SECONDS>          Wall-clock step per tick (default: 0.016)
    --time-scale <X>        Simulated seconds per wall-clock second (default: 1.0)
    --snow <METRES>         Snow deposited before the first tick (default: 0.4)
    --collider-mass <KG>    Mass of the box collider (default: 70)
    --resolution <N>        Height-field resolution (default: 1024)
    --no-collider           Run without the collider

OTHER:
    -h, --help              Print this help message

EXAMPLES:
    # Default scenario
    cargo run -p snowpack-headless --release

    # Heavier load, ten times faster simulated time
    cargo run -p snowpack-headless --release -- --collider-mass 200 --time-scale 10

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
