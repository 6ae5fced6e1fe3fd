//! Coordinate systems for the cell grid and the column raster.
//!
//! Grid cells are stored column-major: the `H` cells of one vertical column
//! are contiguous, so a grid column can be processed as a single slice.
//! Linear index is `y + H * (x + W * z)`.

use glam::UVec3;
use serde::{Deserialize, Serialize};

/// Dimensions of the cell grid in cells (W x H x D).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDimensions {
    /// Cells along world X.
    pub width: u32,
    /// Cells along world Y (vertical slots per column).
    pub height: u32,
    /// Cells along world Z.
    pub depth: u32,
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self::cube(50)
    }
}

impl GridDimensions {
    /// Create grid dimensions.
    #[inline]
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Create a cubic grid.
    #[inline]
    pub const fn cube(size: u32) -> Self {
        Self::new(size, size, size)
    }

    /// Total number of cells (W * H * D).
    #[inline]
    pub const fn cell_count(self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Number of vertical grid columns (W * D).
    #[inline]
    pub const fn column_count(self) -> usize {
        self.width as usize * self.depth as usize
    }

    /// Check whether a grid index lies inside the grid.
    #[inline]
    pub const fn contains(self, index: GridIndex) -> bool {
        index.x < self.width && index.y < self.height && index.z < self.depth
    }

    /// Linear index of a grid column `(x, z)`.
    #[inline]
    pub const fn column_of(self, x: u32, z: u32) -> usize {
        x as usize + self.width as usize * z as usize
    }

    /// Inverse of [`Self::column_of`].
    #[inline]
    pub const fn column_coords(self, column: usize) -> (u32, u32) {
        let w = self.width as usize;
        ((column % w) as u32, (column / w) as u32)
    }
}

/// Position of a cell in the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridIndex {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridIndex {
    /// Create a new grid index
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Convert to linear index for flat array storage
    #[inline]
    pub const fn to_linear(self, dims: GridDimensions) -> usize {
        self.y as usize + dims.height as usize * dims.column_of(self.x, self.z)
    }

    /// Create from linear index
    #[inline]
    pub const fn from_linear(index: usize, dims: GridDimensions) -> Self {
        let h = dims.height as usize;
        let y = (index % h) as u32;
        let (x, z) = dims.column_coords(index / h);
        Self { x, y, z }
    }

    /// Convert to glam UVec3
    #[inline]
    pub const fn to_uvec3(self) -> UVec3 {
        UVec3::new(self.x, self.y, self.z)
    }
}

/// Texel position in the R x R column raster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnIndex {
    pub x: u32,
    pub z: u32,
}

impl ColumnIndex {
    /// Create a new column index
    #[inline]
    pub const fn new(x: u32, z: u32) -> Self {
        Self { x, z }
    }

    /// Linear index into a raster of the given resolution (`x + R * z`).
    #[inline]
    pub const fn to_linear(self, resolution: u32) -> usize {
        self.x as usize + resolution as usize * self.z as usize
    }

    /// Create from linear index
    #[inline]
    pub const fn from_linear(index: usize, resolution: u32) -> Self {
        let r = resolution as usize;
        Self {
            x: (index % r) as u32,
            z: (index / r) as u32,
        }
    }
}
