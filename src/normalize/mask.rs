//! Mask refinement
//!
//! A voxel stays in the mask only where the summed signal it will be fit
//! against is finite and strictly positive.

use rayon::prelude::*;

/// Whether a summed signal value can take part in log-domain fitting
#[inline]
pub fn is_valid_signal(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Refine a mask against a summed signal
///
/// # Returns
/// Mask that is `true` exactly where `initial` is `true` and `signal` is
/// finite and positive
pub fn refine_mask(signal: &[f64], initial: &[bool]) -> Vec<bool> {
    signal
        .par_iter()
        .zip(initial.par_iter())
        .map(|(&s, &m)| m && is_valid_signal(s))
        .collect()
}

/// Drop voxels from `mask` whose signal is not finite and positive
///
/// # Returns
/// Number of voxels left in the mask
pub fn refine_mask_in_place(signal: &[f64], mask: &mut [bool]) -> usize {
    mask.par_iter_mut()
        .zip(signal.par_iter())
        .map(|(m, &s)| {
            *m = *m && is_valid_signal(s);
            *m as usize
        })
        .sum()
}

/// Number of `true` voxels
pub fn count_voxels(mask: &[bool]) -> usize {
    mask.par_iter().filter(|&&m| m).count()
}

/// Linear indices of the `true` voxels, in ascending order
pub fn masked_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &m)| if m { Some(i) } else { None })
        .collect()
}

/// Interpret a numeric mask volume: any finite non-zero value is inside
pub fn mask_from_values(values: &[f64]) -> Vec<bool> {
    values.par_iter().map(|&v| v.is_finite() && v != 0.0).collect()
}
