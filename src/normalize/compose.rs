//! Apply scale factors and bias field to the raw tissue maps

use rayon::prelude::*;

use crate::volume::TissueMap;

/// Corrected tissue map: `max(scale * raw / bias, 0)` for every voxel of
/// every frame
pub fn correct_tissue(tissue: &TissueMap, scale: f64, bias_image: &[f64]) -> Vec<f64> {
    let n = bias_image.len();
    let mut out = vec![0.0; tissue.data.len()];
    out.par_chunks_mut(n)
        .zip(tissue.data.par_chunks(n))
        .for_each(|(out_frame, raw_frame)| {
            for ((o, &raw), &b) in out_frame.iter_mut().zip(raw_frame).zip(bias_image) {
                *o = (scale * raw / b).max(0.0);
            }
        });
    out
}

/// Correct every tissue map with its own scale factor
pub fn correct_tissues(tissues: &[TissueMap], scale: &[f64], bias_image: &[f64]) -> Vec<Vec<f64>> {
    tissues
        .iter()
        .zip(scale)
        .map(|(tissue, &s)| correct_tissue(tissue, s, bias_image))
        .collect()
}
