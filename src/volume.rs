//! Voxel grid and tissue buffers
//!
//! All volumes are flat `Vec`s in Fortran (column-major) order to match the
//! NIfTI convention: `index = x + y*nx + z*nx*ny`. 4D volumes store their
//! frames one after another, so frame `t` occupies `t*n .. (t+1)*n`.

use rayon::prelude::*;

use crate::error::{MtnormError, Result};

/// Index into 3D array (Fortran/column-major order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Spatial extent of a volume plus its voxel-to-scanner transform
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-scanner affine (4x4, row-major)
    pub affine: [f64; 16],
}

impl Grid {
    pub fn new(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), affine: [f64; 16]) -> Self {
        Self { dims, voxel_size, affine }
    }

    /// Grid whose affine is a pure voxel scaling (no rotation, no offset)
    pub fn with_voxel_size(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        let (vsx, vsy, vsz) = voxel_size;
        let affine = [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self { dims, voxel_size, affine }
    }

    /// Number of voxels in one 3D frame
    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Voxel coordinates of a linear index
    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        let (nx, ny, _) = self.dims;
        (index % nx, (index / nx) % ny, index / (nx * ny))
    }

    /// Map voxel coordinates to scanner (physical) space
    #[inline]
    pub fn voxel_to_scanner(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        let a = &self.affine;
        let (x, y, z) = (i as f64, j as f64, k as f64);
        [
            a[0] * x + a[1] * y + a[2] * z + a[3],
            a[4] * x + a[5] * y + a[6] * z + a[7],
            a[8] * x + a[9] * y + a[10] * z + a[11],
        ]
    }

    /// Scanner position of every voxel, indexed like the volume
    pub fn scanner_positions(&self) -> Vec<[f64; 3]> {
        (0..self.len())
            .into_par_iter()
            .map(|v| {
                let (i, j, k) = self.coords(v);
                self.voxel_to_scanner(i, j, k)
            })
            .collect()
    }
}

/// One tissue compartment map. Only the first frame takes part in the
/// estimation; every frame is corrected on output.
#[derive(Clone, Debug)]
pub struct TissueMap {
    pub data: Vec<f64>,
    pub frames: usize,
}

impl TissueMap {
    pub fn new(data: Vec<f64>, frames: usize) -> Self {
        Self { data, frames }
    }

    /// Single-frame (3D) tissue map
    pub fn from_volume(data: Vec<f64>) -> Self {
        Self { data, frames: 1 }
    }

    /// First 3D frame, given the number of voxels per frame
    pub fn first_frame(&self, n_voxels: usize) -> &[f64] {
        &self.data[..n_voxels]
    }

    pub(crate) fn check_extent(&self, grid: &Grid, tissue: usize) -> Result<()> {
        let n = grid.len();
        if self.frames == 0 || self.data.len() != n * self.frames {
            return Err(MtnormError::DimensionMismatch(format!(
                "tissue {} has {} values, expected {} ({} frame(s) of {}x{}x{})",
                tissue,
                self.data.len(),
                n * self.frames.max(1),
                self.frames.max(1),
                grid.dims.0,
                grid.dims.1,
                grid.dims.2
            )));
        }
        Ok(())
    }
}

/// All tissue first frames, clamped to be non-negative and stacked along a
/// tissue axis (tissue-major: value of tissue `j` at voxel `v` lives at
/// `j*n + v`).
#[derive(Clone, Debug)]
pub struct TissueStack {
    values: Vec<f64>,
    n_voxels: usize,
    n_tissues: usize,
}

impl TissueStack {
    pub fn from_tissues(tissues: &[TissueMap], n_voxels: usize) -> Self {
        let mut values = Vec::with_capacity(n_voxels * tissues.len());
        for tissue in tissues {
            values.extend(tissue.first_frame(n_voxels).iter().map(|&x| x.max(0.0)));
        }
        Self { values, n_voxels, n_tissues: tissues.len() }
    }

    pub fn n_tissues(&self) -> usize {
        self.n_tissues
    }

    pub fn n_voxels(&self) -> usize {
        self.n_voxels
    }

    #[inline]
    pub fn value(&self, tissue: usize, voxel: usize) -> f64 {
        self.values[tissue * self.n_voxels + voxel]
    }

    /// `Σ_j scale[j] * tissue[j][voxel]`
    #[inline]
    pub fn weighted_sum(&self, scale: &[f64], voxel: usize) -> f64 {
        scale
            .iter()
            .enumerate()
            .map(|(j, &s)| s * self.value(j, voxel))
            .sum()
    }
}

/// Voxel-wise sum of the raw (unclamped) first frames
pub fn summed_signal(tissues: &[TissueMap], n_voxels: usize) -> Vec<f64> {
    (0..n_voxels)
        .into_par_iter()
        .map(|v| tissues.iter().map(|t| t.data[v]).sum())
        .collect()
}
