//! Cell, column and collision records.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::coords::GridIndex;

/// Grain diameter of newly allocated cells (mm).
pub const INITIAL_GRAIN_SIZE: f32 = 0.2;

/// One element of the snowpack volume.
///
/// Cells are allocated once at init and never destroyed. `pressure`,
/// `applied_pressure`, `collision_pressure` and `is_occupied` are transient
/// and reset at the end of every tick. `indent_amount`,
/// `x_compression_amount`, `hardness`, `temperature` and `grain_size`
/// persist across ticks, including while the slot is empty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    pub grid_index: GridIndex,
    pub linear_index: u32,
    /// Cell centre in world space, refreshed by every populate.
    pub world_position: Vec3,
    /// kg/m^3. Zero for empty slots.
    pub density: f32,
    /// Degrees Celsius.
    pub temperature: f32,
    /// Resistance to compaction in Pa.
    pub hardness: f32,
    /// Overburden plus collision load (Pa), vertical.
    pub pressure: Vec3,
    /// Lateral share of the vertical load (Pa).
    pub applied_pressure: Vec3,
    /// Collision load injected into this cell this tick (Pa).
    pub collision_pressure: Vec3,
    /// Cumulative vertical deformation in meters, at most one cell height.
    pub indent_amount: f32,
    /// Cumulative lateral deformation in meters, at most one cell height.
    pub x_compression_amount: f32,
    /// Vertical extent of snow held by this slot (m).
    pub fill: f32,
    /// Settled mass in kg.
    pub mass: f32,
    /// Mass that does not fit under the density ceiling (kg).
    pub mass_overflow: f32,
    /// Snow grain diameter (mm).
    pub grain_size: f32,
    pub is_occupied: bool,
}

impl Cell {
    /// Create an empty cell at the given grid position.
    pub fn new(grid_index: GridIndex, linear_index: u32, temperature: f32) -> Self {
        Self {
            grid_index,
            linear_index,
            world_position: Vec3::ZERO,
            density: 0.0,
            temperature,
            hardness: 0.0,
            pressure: Vec3::ZERO,
            applied_pressure: Vec3::ZERO,
            collision_pressure: Vec3::ZERO,
            indent_amount: 0.0,
            x_compression_amount: 0.0,
            fill: 0.0,
            mass: 0.0,
            mass_overflow: 0.0,
            grain_size: INITIAL_GRAIN_SIZE,
            is_occupied: false,
        }
    }

    /// Settled plus overflow mass.
    #[inline]
    pub fn total_mass(&self) -> f32 {
        self.mass + self.mass_overflow
    }

    /// Drop the transient per-tick state, keeping deformation history.
    #[inline]
    pub fn clear_transient(&mut self) {
        self.pressure = Vec3::ZERO;
        self.applied_pressure = Vec3::ZERO;
        self.collision_pressure = Vec3::ZERO;
        self.is_occupied = false;
    }

    /// Convert to the render-facing instance record.
    #[inline]
    pub fn to_instance(&self) -> CellInstance {
        CellInstance {
            position: self.world_position.to_array(),
            density: self.density,
            pressure: (self.pressure + self.applied_pressure).to_array(),
            temperature: self.temperature,
            occupied: u32::from(self.is_occupied || self.fill > 0.0),
            _pad: [0; 3],
        }
    }
}

/// Summary of one height-field texel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct ColumnData {
    /// Snow depth above the ground (m).
    pub height: f32,
    /// Ground offset from the base plane (m).
    pub ground_height: f32,
    /// Snow mass over one cell footprint, including overflow (kg).
    pub mass: f32,
    /// Scratch accumulator, zeroed every tick.
    pub mass_temp: f32,
}

impl ColumnData {
    /// Snow surface elevation above the base plane.
    #[inline]
    pub fn surface(&self) -> f32 {
        self.ground_height + self.height
    }
}

/// One footprint cell of a collider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CollisionData {
    /// Footprint-cell centre in world space.
    pub position: Vec3,
    /// Unit pressure (Pa), pointing along -Y.
    pub pressure: Vec3,
}

/// Per-cell record for instanced drawing (48 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CellInstance {
    pub position: [f32; 3],
    pub density: f32,
    pub pressure: [f32; 3],
    pub temperature: f32,
    pub occupied: u32,
    pub _pad: [u32; 3],
}
