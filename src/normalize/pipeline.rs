//! Iteration schedule for the joint scale factor / bias field estimate
//!
//! ```text
//! Init -> Outer(1) -> Inner(1..) -> FitBiasField -> Outer(2) -> ... -> Finalize
//! ```
//!
//! Each outer pass resets the working mask to the initial mask, then
//! alternates scale factor solves with outlier rejection until the factors
//! settle (checked from the second outer pass on) or the inner budget runs
//! out. The bias field is refit once per outer pass. The outer loop always
//! runs `max_iter - 1` passes.

use tracing::{debug, info};

use crate::error::{MtnormError, Result};
use crate::volume::{summed_signal, Grid, TissueMap, TissueStack};

use super::bias_field::{estimate_bias_field, BiasField};
use super::compose::correct_tissues;
use super::mask::{count_voxels, masked_indices, refine_mask};
use super::outlier::reject_outliers;
use super::scale::{geometric_mean, has_converged, mean_relative_change, solve_scale_factors};
use super::NormalizeParams;

/// State after one inner step, handed to the progress callback
#[derive(Debug)]
pub struct PassReport<'a> {
    /// Outer iteration, starting at 1
    pub outer: usize,
    /// Inner iteration within the outer pass, starting at 1
    pub inner: usize,
    /// Scale factors from this step's solve
    pub scale_factors: &'a [f64],
    /// Working mask after this step
    pub mask: &'a [bool],
    /// Number of voxels in the working mask
    pub live_voxels: usize,
    /// Whether the scale factors settled at this step
    pub converged: bool,
}

/// Result of multi-tissue normalisation
#[derive(Clone, Debug)]
pub struct NormalizeOutput {
    /// Corrected tissue maps, same order and shape as the inputs
    pub corrected: Vec<Vec<f64>>,
    /// Scale factor applied to each tissue
    pub scale_factors: Vec<f64>,
    /// Final bias field estimate
    pub bias_field: BiasField,
    /// Final working mask (outlier regions excluded)
    pub mask: Vec<bool>,
    /// Number of outer passes performed
    pub outer_iterations: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Outer(usize),
    Inner { outer: usize, step: usize },
    FitBiasField(usize),
    Finalize,
}

struct Estimator {
    stack: TissueStack,
    positions: Vec<[f64; 3]>,
    initial_mask: Vec<bool>,
    initial_live: usize,
    mask: Vec<bool>,
    live: usize,
    bias: BiasField,
    scale: Vec<f64>,
    previous: Option<Vec<f64>>,
    log_norm: f64,
    max_iter: usize,
}

impl Estimator {
    fn new(
        tissues: &[TissueMap],
        mask: &[bool],
        grid: &Grid,
        params: &NormalizeParams,
    ) -> Result<Self> {
        let n = grid.len();

        let summed = summed_signal(tissues, n);
        let initial_mask = refine_mask(&summed, mask);
        let initial_live = count_voxels(&initial_mask);
        if initial_live == 0 {
            return Err(MtnormError::EmptyMask);
        }
        info!(
            "{} tissue types, {} voxels in refined mask",
            tissues.len(),
            initial_live
        );

        Ok(Self {
            stack: TissueStack::from_tissues(tissues, n),
            positions: grid.scanner_positions(),
            mask: initial_mask.clone(),
            initial_mask,
            initial_live,
            live: initial_live,
            bias: BiasField::flat(n),
            scale: vec![1.0; tissues.len()],
            previous: None,
            log_norm: params.norm_value.ln(),
            max_iter: params.max_iter,
        })
    }

    fn begin_outer(&mut self, outer: usize) -> Phase {
        info!("iteration: {}", outer);
        self.mask.copy_from_slice(&self.initial_mask);
        self.live = self.initial_live;
        Phase::Inner { outer, step: 1 }
    }

    fn inner_step<F>(&mut self, outer: usize, step: usize, progress: &mut F) -> Result<Phase>
    where
        F: FnMut(&PassReport<'_>),
    {
        debug!("norm iteration: {} ({} voxels)", step, self.live);

        let voxels = masked_indices(&self.mask);
        let scale = solve_scale_factors(&self.stack, &self.bias.image, &voxels)?;

        let converged = match self.previous.as_deref() {
            Some(previous) if outer > 1 => {
                info!(
                    "percentage change in estimated scale factors: {}",
                    mean_relative_change(previous, &scale) * 100.0
                );
                has_converged(previous, &scale)
            }
            _ => false,
        };

        if !converged {
            self.live = reject_outliers(&self.stack, &scale, &self.bias.image, &mut self.mask)?;
        }

        self.previous = Some(scale.clone());
        self.scale = scale;

        progress(&PassReport {
            outer,
            inner: step,
            scale_factors: &self.scale,
            mask: &self.mask,
            live_voxels: self.live,
            converged,
        });

        if converged || step + 1 >= self.max_iter {
            Ok(Phase::FitBiasField(outer))
        } else {
            Ok(Phase::Inner { outer, step: step + 1 })
        }
    }

    fn fit_bias_field(&mut self, outer: usize) -> Result<Phase> {
        info!("scale factors: {:?}", self.scale);
        let voxels = masked_indices(&self.mask);
        self.bias = estimate_bias_field(
            &self.stack,
            &self.scale,
            &voxels,
            &self.positions,
            self.log_norm,
        )?;
        Ok(Phase::Outer(outer + 1))
    }
}

fn check_inputs(tissues: &[TissueMap], mask: &[bool], grid: &Grid) -> Result<()> {
    if tissues.len() < 2 {
        return Err(MtnormError::InvalidArgument(format!(
            "at least two tissue types must be provided, got {}",
            tissues.len()
        )));
    }
    if grid.is_empty() {
        return Err(MtnormError::DimensionMismatch("volume has no voxels".to_string()));
    }
    for (j, tissue) in tissues.iter().enumerate() {
        tissue.check_extent(grid, j)?;
    }
    if mask.len() != grid.len() {
        return Err(MtnormError::DimensionMismatch(format!(
            "mask has {} voxels, tissue maps have {}",
            mask.len(),
            grid.len()
        )));
    }
    Ok(())
}

/// Multi-tissue log-domain intensity normalisation
///
/// # Arguments
/// * `tissues` - Tissue compartment maps (at least two), on `grid`
/// * `mask` - Mask to compute the normalisation within
/// * `grid` - Shared voxel grid and voxel-to-scanner affine
/// * `params` - Normalisation parameters
///
/// # Returns
/// Corrected tissue maps with the estimated scale factors, bias field and
/// final outlier mask
pub fn mtnormalise(
    tissues: &[TissueMap],
    mask: &[bool],
    grid: &Grid,
    params: &NormalizeParams,
) -> Result<NormalizeOutput> {
    mtnormalise_with_progress(tissues, mask, grid, params, |_| {})
}

/// Multi-tissue normalisation with a callback after every inner step
pub fn mtnormalise_with_progress<F>(
    tissues: &[TissueMap],
    mask: &[bool],
    grid: &Grid,
    params: &NormalizeParams,
    mut progress: F,
) -> Result<NormalizeOutput>
where
    F: FnMut(&PassReport<'_>),
{
    params.validate()?;
    check_inputs(tissues, mask, grid)?;

    let mut est = Estimator::new(tissues, mask, grid, params)?;

    let mut phase = Phase::Outer(1);
    let mut outer_iterations = 0;
    loop {
        phase = match phase {
            Phase::Outer(outer) if outer >= est.max_iter => Phase::Finalize,
            Phase::Outer(outer) => {
                outer_iterations = outer;
                est.begin_outer(outer)
            }
            Phase::Inner { outer, step } => est.inner_step(outer, step, &mut progress)?,
            Phase::FitBiasField(outer) => est.fit_bias_field(outer)?,
            Phase::Finalize => break,
        };
    }

    let mut scale_factors = est.scale;
    if !params.independent {
        let shared = geometric_mean(&scale_factors);
        scale_factors.iter_mut().for_each(|s| *s = shared);
    }
    info!("applied scale factors: {:?}", scale_factors);

    let corrected = correct_tissues(tissues, &scale_factors, &est.bias.image);

    Ok(NormalizeOutput {
        corrected,
        scale_factors,
        bias_field: est.bias,
        mask: est.mask,
        outer_iterations,
    })
}
