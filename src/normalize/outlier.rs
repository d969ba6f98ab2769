//! Outlier rejection on the log-domain combined signal
//!
//! Voxels whose log combined signal falls outside quartile fences are
//! dropped from the working mask. The fence multiplier is 1.6 rather than
//! the usual 1.5.

use rayon::prelude::*;
use tracing::debug;

use crate::error::{MtnormError, Result};
use crate::volume::TissueStack;

use super::mask::refine_mask_in_place;
use super::OUTLIER_FENCE_MULTIPLIER;

/// Inclusive range of log signal values kept in the mask
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutlierFences {
    pub lower: f64,
    pub upper: f64,
}

impl OutlierFences {
    pub fn from_quartiles(lower_quartile: f64, upper_quartile: f64) -> Self {
        let iqr = upper_quartile - lower_quartile;
        Self {
            lower: lower_quartile - OUTLIER_FENCE_MULTIPLIER * iqr,
            upper: upper_quartile + OUTLIER_FENCE_MULTIPLIER * iqr,
        }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        !(value < self.lower || value > self.upper)
    }
}

/// `Σ_j scale[j] * tissue[j][v] / bias[v]` for every voxel
pub fn corrected_signal(stack: &TissueStack, scale: &[f64], bias_image: &[f64]) -> Vec<f64> {
    bias_image
        .par_iter()
        .enumerate()
        .map(|(v, &b)| stack.weighted_sum(scale, v) / b)
        .collect()
}

/// Element at the nearest-rank position `round(n * fraction)` of sorted data
///
/// The index is clamped to the last element so that tiny samples stay in
/// bounds.
pub fn nearest_rank(sorted: &[f64], fraction: f64) -> f64 {
    let n = sorted.len();
    let index = ((n as f64) * fraction).round() as usize;
    sorted[index.min(n - 1)]
}

/// Lower and upper quartiles by full sort and nearest rank
///
/// `values` must not be empty; it is sorted in place.
pub fn quartiles(values: &mut [f64]) -> (f64, f64) {
    values.par_sort_unstable_by(|a, b| a.total_cmp(b));
    (nearest_rank(values, 0.25), nearest_rank(values, 0.75))
}

/// Tighten the working mask by removing log-signal outliers
///
/// The mask is first refined against the corrected combined signal, so it
/// only ever loses voxels here.
///
/// # Returns
/// Number of voxels left in the mask
pub fn reject_outliers(
    stack: &TissueStack,
    scale: &[f64],
    bias_image: &[f64],
    mask: &mut [bool],
) -> Result<usize> {
    let signal = corrected_signal(stack, scale, bias_image);
    let live = refine_mask_in_place(&signal, mask);
    if live == 0 {
        return Err(MtnormError::EmptyMask);
    }

    let log_signal: Vec<f64> = signal.par_iter().map(|s| s.ln()).collect();
    let mut in_mask: Vec<f64> = log_signal
        .iter()
        .zip(mask.iter())
        .filter_map(|(&l, &m)| if m { Some(l) } else { None })
        .collect();

    let (q1, q3) = quartiles(&mut in_mask);
    let fences = OutlierFences::from_quartiles(q1, q3);

    let removed: usize = mask
        .par_iter_mut()
        .zip(log_signal.par_iter())
        .map(|(m, &l)| {
            if *m && !fences.contains(l) {
                *m = false;
                1
            } else {
                0
            }
        })
        .sum();

    debug!(
        "outlier fences [{:.4}, {:.4}] removed {} of {} voxels",
        fences.lower, fences.upper, removed, live
    );
    Ok(live - removed)
}
