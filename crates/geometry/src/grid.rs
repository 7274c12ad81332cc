use glam::{DMat3, DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Integer voxel index `(i, j, k)`. Signed so that out-of-range queries can
/// be expressed and rejected.
pub type Ijk = [i64; 3];

/// Regular sampling grid: three spatial extents, an optional trailing
/// time-point extent, and an affine from voxel indices to world coordinates.
///
/// Linear indices run in C order, `lin = i * ny * nz + j * nz + k`.
///
/// Batch conversions never fail; rows outside the grid come back as `None`
/// (indices) or `NaN` (world coordinates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridGeometryRepr", into = "GridGeometryRepr")]
pub struct GridGeometry {
    shape: [usize; 3],
    ntimepoints: Option<usize>,
    affine: DMat4,
    inverse: DMat4,
}

#[derive(Serialize, Deserialize)]
struct GridGeometryRepr {
    shape: Vec<usize>,
    affine: [[f64; 4]; 4],
}

impl TryFrom<GridGeometryRepr> for GridGeometry {
    type Error = GeometryError;

    fn try_from(repr: GridGeometryRepr) -> Result<Self, Self::Error> {
        GridGeometry::from_rows(&repr.shape, repr.affine)
    }
}

impl From<GridGeometry> for GridGeometryRepr {
    fn from(grid: GridGeometry) -> Self {
        let mut shape = grid.shape.to_vec();
        shape.extend(grid.ntimepoints);
        Self {
            shape,
            affine: grid.affine_rows(),
        }
    }
}

impl GridGeometry {
    pub fn new(shape: &[usize], affine: DMat4) -> Result<Self, GeometryError> {
        if shape.len() != 3 && shape.len() != 4 {
            return Err(GeometryError::InvalidShape(shape.to_vec()));
        }
        if let Some(axis) = shape.iter().position(|&n| n == 0) {
            return Err(GeometryError::ZeroExtent { axis });
        }
        if !affine.is_finite() {
            return Err(GeometryError::NonFiniteAffine);
        }
        let bottom = affine.row(3);
        if bottom != DVec4::new(0.0, 0.0, 0.0, 1.0) {
            return Err(GeometryError::NotAffine(bottom.to_array()));
        }
        let det = DMat3::from_mat4(affine).determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(GeometryError::SingularAffine(det));
        }

        Ok(Self {
            shape: [shape[0], shape[1], shape[2]],
            ntimepoints: shape.get(3).copied(),
            affine,
            inverse: affine.inverse(),
        })
    }

    /// Builds a grid from a row-major affine, as stored in image headers.
    pub fn from_rows(shape: &[usize], rows: [[f64; 4]; 4]) -> Result<Self, GeometryError> {
        Self::new(shape, DMat4::from_cols_array_2d(&rows).transpose())
    }

    /// Axis-aligned grid with isotropic voxels whose first voxel sits at `origin`.
    pub fn isotropic(
        shape: &[usize],
        voxel_size: f64,
        origin: [f64; 3],
    ) -> Result<Self, GeometryError> {
        let affine = DMat4::from_translation(DVec3::from(origin))
            * DMat4::from_scale(DVec3::splat(voxel_size));
        Self::new(shape, affine)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn ntimepoints(&self) -> Option<usize> {
        self.ntimepoints
    }

    pub fn nvoxels(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    pub fn affine(&self) -> DMat4 {
        self.affine
    }

    pub fn affine_rows(&self) -> [[f64; 4]; 4] {
        self.affine.transpose().to_cols_array_2d()
    }

    /// Length of each voxel edge in world units.
    pub fn voxel_size(&self) -> [f64; 3] {
        [
            self.affine.x_axis.truncate().length(),
            self.affine.y_axis.truncate().length(),
            self.affine.z_axis.truncate().length(),
        ]
    }

    /// Same spatial grid, ignoring the time-point extent.
    pub fn same_space(&self, other: &GridGeometry) -> bool {
        self.shape == other.shape && self.affine == other.affine
    }

    pub fn contains_ijk(&self, ijk: Ijk) -> bool {
        ijk.iter()
            .zip(self.shape.iter())
            .all(|(&c, &n)| c >= 0 && (c as u64) < n as u64)
    }

    pub fn contains_lin(&self, lin: i64) -> bool {
        lin >= 0 && (lin as u64) < self.nvoxels() as u64
    }

    pub fn ijk_to_lin(&self, ijk: Ijk) -> Option<usize> {
        if !self.contains_ijk(ijk) {
            return None;
        }
        let [_, ny, nz] = self.shape;
        Some(ijk[0] as usize * ny * nz + ijk[1] as usize * nz + ijk[2] as usize)
    }

    pub fn lin_to_ijk(&self, lin: i64) -> Option<Ijk> {
        if !self.contains_lin(lin) {
            return None;
        }
        let lin = lin as usize;
        let [_, ny, nz] = self.shape;
        let k = lin % nz;
        let j = (lin / nz) % ny;
        let i = lin / (ny * nz);
        Some([i as i64, j as i64, k as i64])
    }

    pub fn ijk_to_xyz(&self, ijk: Ijk) -> [f64; 3] {
        if !self.contains_ijk(ijk) {
            return [f64::NAN; 3];
        }
        let index = DVec3::new(ijk[0] as f64, ijk[1] as f64, ijk[2] as f64);
        self.affine.transform_point3(index).to_array()
    }

    /// Nearest voxel to a world coordinate. The inverse affine is applied
    /// exactly and each axis rounded half away from zero, so a point exactly
    /// between two voxels resolves to the one further from index zero.
    pub fn xyz_to_ijk(&self, xyz: [f64; 3]) -> Option<Ijk> {
        let world = DVec3::from(xyz);
        if !world.is_finite() {
            return None;
        }
        let index = self.inverse.transform_point3(world);
        let ijk = [
            index.x.round() as i64,
            index.y.round() as i64,
            index.z.round() as i64,
        ];
        self.contains_ijk(ijk).then_some(ijk)
    }

    pub fn lin_to_xyz(&self, lin: i64) -> [f64; 3] {
        match self.lin_to_ijk(lin) {
            Some(ijk) => self.ijk_to_xyz(ijk),
            None => [f64::NAN; 3],
        }
    }

    pub fn xyz_to_lin(&self, xyz: [f64; 3]) -> Option<usize> {
        self.xyz_to_ijk(xyz).and_then(|ijk| self.ijk_to_lin(ijk))
    }

    pub fn contains_ijk_batch(&self, ijks: &[Ijk]) -> Vec<bool> {
        ijks.iter().map(|&ijk| self.contains_ijk(ijk)).collect()
    }

    pub fn contains_lin_batch(&self, lins: &[i64]) -> Vec<bool> {
        lins.iter().map(|&lin| self.contains_lin(lin)).collect()
    }

    pub fn ijk_to_lin_batch(&self, ijks: &[Ijk]) -> Vec<Option<usize>> {
        ijks.iter().map(|&ijk| self.ijk_to_lin(ijk)).collect()
    }

    pub fn lin_to_ijk_batch(&self, lins: &[i64]) -> Vec<Option<Ijk>> {
        lins.iter().map(|&lin| self.lin_to_ijk(lin)).collect()
    }

    pub fn ijk_to_xyz_batch(&self, ijks: &[Ijk]) -> Vec<[f64; 3]> {
        ijks.iter().map(|&ijk| self.ijk_to_xyz(ijk)).collect()
    }

    pub fn xyz_to_ijk_batch(&self, xyzs: &[[f64; 3]]) -> Vec<Option<Ijk>> {
        xyzs.iter().map(|&xyz| self.xyz_to_ijk(xyz)).collect()
    }

    pub fn lin_to_xyz_batch(&self, lins: &[i64]) -> Vec<[f64; 3]> {
        lins.iter().map(|&lin| self.lin_to_xyz(lin)).collect()
    }

    pub fn xyz_to_lin_batch(&self, xyzs: &[[f64; 3]]) -> Vec<Option<usize>> {
        xyzs.iter().map(|&xyz| self.xyz_to_lin(xyz)).collect()
    }
}
