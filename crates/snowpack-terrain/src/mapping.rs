//! Projection between world space and the column raster.
//!
//! Texel `i` sits at `plane_min + i * side / (R - 1)`, so texels 0 and
//! `R - 1` lie exactly on the plane edges.

use glam::{Vec2, Vec3};
use snowpack_core::{ColumnIndex, PlaneConfig};

/// Result of projecting a world position onto the raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnLookup {
    pub index: ColumnIndex,
    /// The position fell outside the plane and was clamped to the edge.
    pub clamped: bool,
}

/// World-space placement of the R x R column raster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneMapping {
    center: Vec3,
    side_size: f32,
    resolution: u32,
}

impl PlaneMapping {
    pub fn new(plane: PlaneConfig, resolution: u32) -> Self {
        Self {
            center: plane.center,
            side_size: plane.side_size,
            resolution,
        }
    }

    #[inline]
    pub const fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Height of the base plane.
    #[inline]
    pub fn base_y(&self) -> f32 {
        self.center.y
    }

    #[inline]
    fn min_corner(&self) -> Vec2 {
        Vec2::new(self.center.x, self.center.z) - Vec2::splat(self.side_size * 0.5)
    }

    #[inline]
    fn texel_span(&self) -> f32 {
        (self.resolution - 1) as f32
    }

    /// Project a world XZ position to the nearest texel, clamping out-of-range
    /// positions to the raster edge.
    pub fn world_to_column(&self, position: Vec3) -> ColumnLookup {
        let local = (Vec2::new(position.x, position.z) - self.min_corner()) / self.side_size;
        let texel = (local * self.texel_span()).round();
        let max = self.texel_span();
        let clamped_texel = texel.clamp(Vec2::ZERO, Vec2::splat(max));
        // NaN input clamps to texel 0
        let clamped = texel != clamped_texel || texel.is_nan();
        let clamped_texel = if clamped_texel.is_nan() {
            Vec2::ZERO
        } else {
            clamped_texel
        };
        ColumnLookup {
            index: ColumnIndex::new(clamped_texel.x as u32, clamped_texel.y as u32),
            clamped,
        }
    }

    /// World XZ centre of a texel.
    pub fn column_center(&self, index: ColumnIndex) -> Vec2 {
        let step = self.side_size / self.texel_span();
        self.min_corner() + Vec2::new(index.x as f32, index.z as f32) * step
    }
}
