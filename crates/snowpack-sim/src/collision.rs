//! Collider footprints and the collision buffer.
//!
//! Each tick the physics side hands over a list of rigid-body boxes. Every
//! box is rasterised into footprint cells of `cell_size` and each cell carries
//! the box's weight spread over its footprint area. Entries for all colliders
//! are packed into one flat buffer; `heads` records where each collider's run
//! starts.

use glam::Vec3;
use snowpack_core::constants::{GRAVITY, SLOT_EPSILON};
use snowpack_core::{Aabb, CollisionData};
use snowpack_terrain::{ColumnLookup, PlaneMapping};
use tracing::warn;

use crate::readback::ColumnSnapshot;

/// A rigid body resting on the snow.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColliderDescriptor {
    /// World-space bounds.
    pub bounds: Aabb,
    /// Mass in kilograms.
    pub mass: f32,
}

impl ColliderDescriptor {
    pub const fn new(bounds: Aabb, mass: f32) -> Self {
        Self { bounds, mass }
    }

    pub fn from_center_size(center: Vec3, size: Vec3, mass: f32) -> Self {
        Self::new(Aabb::from_center_size(center, size), mass)
    }

    /// Downward contact pressure in pascals, or `None` for a degenerate box.
    pub fn contact_pressure(&self) -> Option<f32> {
        let area = self.bounds.footprint_area();
        if !(area > 0.0) || !self.mass.is_finite() || self.mass < 0.0 {
            return None;
        }
        Some(-(self.mass * GRAVITY) / area)
    }
}

/// Counters produced by [`CollisionInjector::build`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InjectStats {
    /// Colliders that produced footprint cells.
    pub colliders: usize,
    /// Footprint cells written.
    pub cells: usize,
    /// Footprint cells whose position fell off the plane.
    pub clamped: usize,
    /// Colliders skipped for zero footprint or invalid mass.
    pub degenerate: usize,
}

/// Builds the per-tick collision buffer from collider descriptors.
pub struct CollisionInjector {
    mapping: PlaneMapping,
    cell_size: f32,
    buffer: Vec<CollisionData>,
    heads: Vec<usize>,
    enabled: bool,
}

impl CollisionInjector {
    pub fn new(mapping: PlaneMapping, cell_size: f32) -> Self {
        Self {
            mapping,
            cell_size,
            buffer: Vec::new(),
            heads: Vec::new(),
            enabled: true,
        }
    }

    #[inline]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    /// Project a world position onto the column raster.
    #[inline]
    pub fn map_world_to_column(&self, position: Vec3) -> ColumnLookup {
        self.mapping.world_to_column(position)
    }

    /// Number of footprint cells along X and Z for a box of the given size.
    pub fn footprint_dims(&self, size: Vec3) -> (u32, u32) {
        let cells = |extent: f32| (extent / self.cell_size - SLOT_EPSILON).ceil().max(1.0) as u32;
        (cells(size.x), cells(size.z))
    }

    /// Rebuild the collision buffer for this tick.
    pub fn build(&mut self, colliders: &[ColliderDescriptor]) -> InjectStats {
        self.clear();
        let mut stats = InjectStats::default();
        if !self.enabled {
            return stats;
        }

        for collider in colliders {
            let Some(pressure) = collider.contact_pressure() else {
                warn!(
                    bounds = ?collider.bounds,
                    mass = collider.mass,
                    "Skipping degenerate collider"
                );
                stats.degenerate += 1;
                continue;
            };

            let (cells_x, cells_z) = self.footprint_dims(collider.bounds.size());
            let min = collider.bounds.min;
            self.heads.push(self.buffer.len());

            for j in 0..cells_z {
                for i in 0..cells_x {
                    let mut position = min
                        + Vec3::new(
                            (i as f32 + 0.5) * self.cell_size,
                            0.0,
                            (j as f32 + 0.5) * self.cell_size,
                        );
                    let lookup = self.mapping.world_to_column(position);
                    if lookup.clamped {
                        let snapped = self.mapping.column_center(lookup.index);
                        position = Vec3::new(snapped.x, min.y, snapped.y);
                        stats.clamped += 1;
                    }
                    self.buffer.push(CollisionData {
                        position,
                        pressure: Vec3::new(0.0, pressure, 0.0),
                    });
                }
            }
            stats.colliders += 1;
        }

        stats.cells = self.buffer.len();
        stats
    }

    /// Packed footprint cells for every collider.
    #[inline]
    pub fn buffer(&self) -> &[CollisionData] {
        &self.buffer
    }

    /// Start offset of each collider's footprint in [`Self::buffer`].
    #[inline]
    pub fn heads(&self) -> &[usize] {
        &self.heads
    }

    /// Footprint cells of the `n`th collider that produced any.
    pub fn footprint(&self, n: usize) -> &[CollisionData] {
        let Some(&start) = self.heads.get(n) else {
            return &[];
        };
        let end = self.heads.get(n + 1).copied().unwrap_or(self.buffer.len());
        &self.buffer[start..end]
    }

    #[inline]
    pub fn has_active(&self) -> bool {
        self.enabled && !self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.heads.clear();
    }

    /// Rest a collider's bottom face on the snow surface under its centre.
    pub fn settle(&self, collider: &ColliderDescriptor, snapshot: &ColumnSnapshot) -> ColliderDescriptor {
        let lookup = self.mapping.world_to_column(collider.bounds.center());
        let surface = snapshot
            .get(lookup.index)
            .map_or(0.0, |column| column.surface());
        ColliderDescriptor {
            bounds: collider.bounds.with_bottom_at(self.mapping.base_y() + surface),
            mass: collider.mass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use snowpack_core::{ColumnData, PlaneConfig};

    fn injector() -> CollisionInjector {
        let plane = PlaneConfig {
            center: Vec3::ZERO,
            side_size: 10.0,
        };
        CollisionInjector::new(PlaneMapping::new(plane, 1024), 0.2)
    }

    fn boot() -> ColliderDescriptor {
        ColliderDescriptor::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.4, 0.3, 0.4), 70.0)
    }

    #[test]
    fn footprint_pressure_from_weight() {
        let mut injector = injector();
        let stats = injector.build(&[boot()]);

        assert_eq!(stats.colliders, 1);
        assert_eq!(stats.cells, 4);
        assert_eq!(stats.clamped, 0);
        for entry in injector.buffer() {
            assert_relative_eq!(entry.pressure.y, -(70.0 * 9.81) / 0.16, max_relative = 1e-5);
            assert_eq!(entry.pressure.x, 0.0);
        }
        let xs: Vec<f32> = injector.buffer().iter().map(|e| e.position.x).collect();
        assert_relative_eq!(xs[0], -0.1, epsilon = 1e-5);
        assert_relative_eq!(xs[1], 0.1, epsilon = 1e-5);
    }

    #[test]
    fn partial_cells_round_up() {
        let injector = injector();
        assert_eq!(injector.footprint_dims(Vec3::new(0.5, 1.0, 0.05)), (3, 1));
    }

    #[test]
    fn heads_index_each_collider() {
        let mut injector = injector();
        let wide = ColliderDescriptor::from_center_size(Vec3::new(2.0, 0.0, 2.0), Vec3::new(0.6, 0.1, 0.2), 10.0);
        injector.build(&[boot(), wide]);

        assert_eq!(injector.heads(), &[0, 4]);
        assert_eq!(injector.footprint(0).len(), 4);
        assert_eq!(injector.footprint(1).len(), 3);
        assert!(injector.footprint(2).is_empty());
    }

    #[test]
    fn degenerate_colliders_are_skipped() {
        let mut injector = injector();
        let flat = ColliderDescriptor::from_center_size(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.4), 5.0);
        let weightless = ColliderDescriptor::from_center_size(Vec3::ZERO, Vec3::ONE, f32::NAN);
        let stats = injector.build(&[flat, boot(), weightless]);

        assert_eq!(stats.degenerate, 2);
        assert_eq!(stats.colliders, 1);
        assert_eq!(injector.heads(), &[0]);
    }

    #[test]
    fn off_plane_cells_are_clamped() {
        let mut injector = injector();
        let outside = ColliderDescriptor::from_center_size(Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.4, 0.1, 0.2), 10.0);
        let stats = injector.build(&[outside]);

        assert_eq!(stats.clamped, 1);
        assert!(injector.buffer().iter().all(|e| e.position.x <= 5.0 + 1e-4));
    }

    #[test]
    fn disabled_injector_produces_nothing() {
        let mut injector = injector();
        injector.build(&[boot()]);
        injector.set_enabled(false);
        assert!(!injector.has_active());

        let stats = injector.build(&[boot()]);
        assert_eq!(stats, InjectStats::default());
        assert!(injector.buffer().is_empty());
    }

    #[test]
    fn settle_rests_on_snow_surface() {
        let injector = injector();
        let columns: std::sync::Arc<[ColumnData]> = vec![
            ColumnData {
                height: 0.4,
                ground_height: 0.25,
                mass: 0.32,
                mass_temp: 0.32,
            };
            1024 * 1024
        ]
        .into();
        let snapshot = ColumnSnapshot::new(3, 1024, columns);

        let settled = injector.settle(&boot(), &snapshot);

        assert_relative_eq!(settled.bounds.min.y, 0.65, epsilon = 1e-5);
        assert_relative_eq!(settled.bounds.size().y, 0.3, epsilon = 1e-5);
        assert_eq!(settled.mass, 70.0);
    }
}
