//! Per-tissue scale factors
//!
//! Within the mask, the bias-corrected tissue maps weighted by their scale
//! factors should sum to one:
//!
//! `Σ_j scale[j] * tissue[j][v] / bias[v] ≈ 1`
//!
//! The factors are found by least squares and rescaled so that their
//! geometric mean is one.

use nalgebra::{DMatrix, DVector};

use crate::error::{MtnormError, Result};
use crate::solvers::least_squares;
use crate::volume::TissueStack;

use super::CONVERGENCE_THRESHOLD;

/// Solve for the tissue scale factors over the masked voxels
///
/// # Arguments
/// * `stack` - Clamped tissue first frames
/// * `bias_image` - Current bias field (image domain)
/// * `voxels` - Linear indices of the working mask
///
/// # Returns
/// Strictly positive factors with `mean(ln(scale)) == 0`
pub fn solve_scale_factors(
    stack: &TissueStack,
    bias_image: &[f64],
    voxels: &[usize],
) -> Result<Vec<f64>> {
    if voxels.is_empty() {
        return Err(MtnormError::EmptyMask);
    }

    let n_tissues = stack.n_tissues();
    let x = DMatrix::from_fn(voxels.len(), n_tissues, |r, j| {
        let v = voxels[r];
        stack.value(j, v) / bias_image[v]
    });
    let y = DVector::from_element(voxels.len(), 1.0);

    let solution = least_squares(x, y)?;
    let mut scale: Vec<f64> = solution.iter().copied().collect();

    for (tissue, &value) in scale.iter().enumerate() {
        if value <= 0.0 {
            return Err(MtnormError::NonPositiveScaleFactor { tissue, value });
        }
    }

    let norm = geometric_mean(&scale);
    for s in scale.iter_mut() {
        *s /= norm;
    }
    Ok(scale)
}

/// `exp(mean(ln(values)))`
pub fn geometric_mean(values: &[f64]) -> f64 {
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    (log_sum / values.len() as f64).exp()
}

/// Mean absolute change of `current` relative to `previous`
pub fn mean_relative_change(previous: &[f64], current: &[f64]) -> f64 {
    let total: f64 = previous
        .iter()
        .zip(current)
        .map(|(p, c)| (p - c).abs() / p)
        .sum();
    total / previous.len() as f64
}

/// Scale factors have settled when they moved less than 0.1% on average
pub fn has_converged(previous: &[f64], current: &[f64]) -> bool {
    mean_relative_change(previous, current) < CONVERGENCE_THRESHOLD
}
