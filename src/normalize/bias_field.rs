//! Smooth multiplicative bias field
//!
//! The field is modelled in the log domain as a third-order polynomial of
//! scanner position. Weights are fit on the working mask and the field is
//! then reconstructed over the whole grid, so it extrapolates beyond the
//! mask.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{MtnormError, Result};
use crate::solvers::least_squares;
use crate::volume::TissueStack;

use super::basis::{basis_function, evaluate, BASIS_SIZE};

/// Bias field in both the log and the image domain
#[derive(Clone, Debug)]
pub struct BiasField {
    /// ln of the multiplicative field
    pub log: Vec<f64>,
    /// `exp(log)`, voxel by voxel
    pub image: Vec<f64>,
}

impl BiasField {
    /// Field equal to one everywhere
    pub fn flat(n_voxels: usize) -> Self {
        Self {
            log: vec![0.0; n_voxels],
            image: vec![1.0; n_voxels],
        }
    }

    /// Reconstruct the field over every voxel from basis weights
    pub fn from_weights(positions: &[[f64; 3]], weights: &[f64]) -> Self {
        let log: Vec<f64> = positions.par_iter().map(|&p| evaluate(p, weights)).collect();
        let image = log.par_iter().map(|l| l.exp()).collect();
        Self { log, image }
    }
}

/// Fit basis weights to the log-domain residual
///
/// Target at each masked voxel is `ln(Σ_j scale[j] * tissue[j][v]) - log_norm`.
///
/// # Arguments
/// * `stack` - Clamped tissue first frames
/// * `scale` - Current scale factors
/// * `voxels` - Linear indices of the working mask
/// * `positions` - Scanner position of every voxel
/// * `log_norm` - ln of the target normalisation value
pub fn fit_bias_weights(
    stack: &TissueStack,
    scale: &[f64],
    voxels: &[usize],
    positions: &[[f64; 3]],
    log_norm: f64,
) -> Result<Vec<f64>> {
    if voxels.is_empty() {
        return Err(MtnormError::EmptyMask);
    }

    let rows: Vec<[f64; BASIS_SIZE]> = voxels
        .par_iter()
        .map(|&v| basis_function(positions[v]))
        .collect();
    let design = DMatrix::from_fn(voxels.len(), BASIS_SIZE, |r, c| rows[r][c]);

    let target = DVector::from_iterator(
        voxels.len(),
        voxels.iter().map(|&v| stack.weighted_sum(scale, v).ln() - log_norm),
    );

    let weights = least_squares(design, target)?;
    Ok(weights.iter().copied().collect())
}

/// Fit the bias field and reconstruct it over the whole grid
pub fn estimate_bias_field(
    stack: &TissueStack,
    scale: &[f64],
    voxels: &[usize],
    positions: &[[f64; 3]],
    log_norm: f64,
) -> Result<BiasField> {
    let weights = fit_bias_weights(stack, scale, voxels, positions, log_norm)?;
    Ok(BiasField::from_weights(positions, &weights))
}
