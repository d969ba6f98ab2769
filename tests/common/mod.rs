//! Common test utilities for mtnorm integration tests
#![allow(dead_code)]

use mtnorm::{Grid, TissueMap};

/// Edge length of the synthetic phantoms
pub const N: usize = 10;

/// 10x10x10 grid with 2 mm voxels, centred on the scanner origin
/// (scanner coordinate of voxel i is 2i - 9)
pub fn phantom_grid() -> Grid {
    let affine = [
        2.0, 0.0, 0.0, -9.0,
        0.0, 2.0, 0.0, -9.0,
        0.0, 0.0, 2.0, -9.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    Grid::new((N, N, N), (2.0, 2.0, 2.0), affine)
}

/// Voxel coordinates of a linear index on the phantom grid
pub fn coords(v: usize) -> (usize, usize, usize) {
    (v % N, (v / N) % N, v / (N * N))
}

pub fn linear_index(i: usize, j: usize, k: usize) -> usize {
    i + j * N + k * N * N
}

/// Smooth multiplicative bias used by the ramp phantom
pub fn ramp_bias(grid: &Grid) -> Vec<f64> {
    grid.scanner_positions()
        .iter()
        .map(|p| (0.03 * p[0] - 0.02 * p[1] + 0.025 * p[2]).exp())
        .collect()
}

/// Three tissues whose fractions sum to one in every voxel, each divided by
/// its own scale factor and all multiplied by [`ramp_bias`]
pub fn ramp_phantom(grid: &Grid, true_scale: [f64; 3]) -> Vec<TissueMap> {
    let base = [0.6, 0.3, 0.1];
    let bias = ramp_bias(grid);
    let n = grid.len();
    (0..3)
        .map(|q| {
            let data = (0..n)
                .map(|v| {
                    let (i, j, k) = coords(v);
                    let p = (i + 2 * j + k) % 3;
                    base[(q + p) % 3] * bias[v] / true_scale[q]
                })
                .collect();
            TissueMap::from_volume(data)
        })
        .collect()
}

/// Voxels overwritten with extreme values in the salt phantom
pub const SALT_VOXELS: [(usize, usize, usize); 4] = [(2, 3, 4), (7, 1, 5), (5, 5, 1), (1, 8, 7)];

/// Two tissues in a checkerboard of 70/30 fractions, no bias
pub fn checkerboard_phantom(grid: &Grid, true_scale: [f64; 2]) -> Vec<TissueMap> {
    let n = grid.len();
    (0..2)
        .map(|q| {
            let data = (0..n)
                .map(|v| {
                    let (i, j, k) = coords(v);
                    let f = if (i + j + k) % 2 == 0 { [0.7, 0.3] } else { [0.3, 0.7] };
                    f[q] / true_scale[q]
                })
                .collect();
            TissueMap::from_volume(data)
        })
        .collect()
}

/// Voxel-wise sum of corrected maps
pub fn summed(maps: &[Vec<f64>]) -> Vec<f64> {
    let n = maps[0].len();
    (0..n).map(|v| maps.iter().map(|m| m[v]).sum()).collect()
}

/// Maximum relative deviation of `a` from `b` within mask
pub fn max_rel_diff(a: &[f64], b: &[f64], mask: &[bool]) -> f64 {
    a.iter()
        .zip(b)
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|((x, y), _)| ((x - y) / y).abs())
        .fold(0.0, f64::max)
}

/// Compute RMSE between two arrays, only within mask
pub fn rmse(a: &[f64], b: &[f64], mask: &[bool]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] {
            let diff = a[i] - b[i];
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Unique scratch path under the system temp directory
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("mtnorm_it_{}_{}", std::process::id(), name))
}
