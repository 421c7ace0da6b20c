//! Distribution maps: gridded member density around a cluster head.
//!
//! A map covers `size × size` cells of width `scale`, centred on the owning
//! cluster head. Cell `index = size·i + j` is sampled at
//! `(j·scale - offset, i·scale - offset)` with `offset = scale·(size/2)`.
//!
//! Values are relative densities: the kernel sum per member multiplied by
//! the map area `(size·scale)²`. A spread that is uniform over the map reads
//! 1.0 everywhere, so cells above [`DENSITY_THRESHOLD`] are denser than
//! uniform and mark plausible member locations.

use serde::{Deserialize, Serialize};
use tracing::warn;
use wavefront_geometry::Vec2;

use crate::error::{DensityError, Result};
use crate::kde::GaussianKde;

/// Cells strictly above this value are forwarding candidates.
pub const DENSITY_THRESHOLD: f64 = 1.0;

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Cells per side.
    pub size: usize,
    /// Cell width in meters.
    pub scale: f64,
}

impl GridSpec {
    pub const fn new(size: usize, scale: f64) -> Self {
        Self { size, scale }
    }

    /// Reject grids that cannot hold a centred origin cell.
    pub fn validate(&self) -> Result<()> {
        if self.size < 2 || !(self.scale > 0.0) || !self.scale.is_finite() {
            return Err(DensityError::InvalidGrid {
                size: self.size,
                scale: self.scale,
            });
        }
        Ok(())
    }

    /// Number of cells.
    pub const fn cell_count(&self) -> usize {
        self.size * self.size
    }

    /// Distance from the grid corner to the origin sample.
    pub fn offset(&self) -> f64 {
        self.scale * (self.size / 2) as f64
    }

    /// Area covered by the grid, in square meters.
    pub fn area(&self) -> f64 {
        let side = self.size as f64 * self.scale;
        side * side
    }

    /// Sample position of the cell at row `i`, column `j`.
    pub fn sample_point(&self, i: usize, j: usize) -> Vec2 {
        let offset = self.offset();
        Vec2::new(self.scale * j as f64 - offset, self.scale * i as f64 - offset)
    }

    /// Offset from the cluster head represented by a flat cell index.
    pub fn cell_offset(&self, index: usize) -> Vec2 {
        self.sample_point(index / self.size, index % self.size)
    }

    /// Index of the cell that samples the cluster head itself.
    pub const fn origin_index(&self) -> usize {
        let mid = self.size / 2;
        self.size * mid + mid
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self::new(20, 10.0)
    }
}

/// Gridded relative density of a cluster's members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionMap {
    spec: GridSpec,
    cells: Vec<f64>,
}

impl DistributionMap {
    /// Dirac-like map: 1.0 at the origin cell, 0.0 elsewhere.
    pub fn fallback(spec: GridSpec) -> Self {
        let mut cells = vec![0.0; spec.cell_count()];
        if let Some(origin) = cells.get_mut(spec.origin_index()) {
            *origin = 1.0;
        }
        Self { spec, cells }
    }

    /// Estimate the map from member offsets relative to the cluster head.
    ///
    /// The head's own zero offset counts as a member. With fewer than two
    /// members this yields [`fallback`](Self::fallback). Collinear or
    /// coincident members fail with [`DensityError::SingularBandwidth`].
    pub fn build(spec: GridSpec, offsets: &[Vec2]) -> Result<Self> {
        spec.validate()?;
        if offsets.len() < 2 {
            return Ok(Self::fallback(spec));
        }

        let members = offsets.len() as f64;
        let kde = GaussianKde::new(offsets.to_vec())?;
        let scale = spec.area() / members;

        let mut cells = Vec::with_capacity(spec.cell_count());
        for i in 0..spec.size {
            for j in 0..spec.size {
                cells.push(kde.eval(spec.sample_point(i, j)) * scale);
            }
        }

        if cells.iter().any(|v| !v.is_finite()) {
            return Err(DensityError::NonFinite);
        }
        Ok(Self { spec, cells })
    }

    /// Like [`build`](Self::build), recovering degenerate geometry with the fallback map.
    pub fn build_or_fallback(spec: GridSpec, offsets: &[Vec2]) -> Self {
        match Self::build(spec, offsets) {
            Ok(map) => map,
            Err(err) => {
                warn!(members = offsets.len(), error = %err, "Degenerate member geometry, using fallback map");
                Self::fallback(spec)
            }
        }
    }

    /// Reassemble a map from raw cells, checking the shape.
    pub fn from_cells(spec: GridSpec, cells: Vec<f64>) -> Result<Self> {
        spec.validate()?;
        let map = Self { spec, cells };
        map.check_shape()?;
        Ok(map)
    }

    /// Verify the cell buffer matches the grid spec.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.spec.cell_count();
        if self.cells.len() != expected {
            return Err(DensityError::ShapeMismatch {
                size: self.spec.size,
                expected,
                actual: self.cells.len(),
            });
        }
        Ok(())
    }

    pub fn spec(&self) -> GridSpec {
        self.spec
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    /// Value of a single cell.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.cells.get(index).copied()
    }

    /// Cells above [`DENSITY_THRESHOLD`] as `(index, value)` pairs.
    pub fn dense_cells(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, v)| v > DENSITY_THRESHOLD)
    }

    /// Absolute positions of dense cells, given the owning head's position.
    pub fn dense_positions(&self, head: Vec2) -> impl Iterator<Item = Vec2> + '_ {
        self.dense_cells()
            .map(move |(index, _)| head + self.spec.cell_offset(index))
    }

    /// Probability mass the grid captures (≈ 1 when members sit well inside).
    pub fn captured_mass(&self) -> f64 {
        let cell_area = self.spec.scale * self.spec.scale;
        self.cells.iter().sum::<f64>() * cell_area / self.spec.area()
    }
}
