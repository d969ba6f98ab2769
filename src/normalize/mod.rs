//! Multi-tissue log-domain intensity normalisation
//!
//! Jointly estimates per-tissue scale factors and a smooth multiplicative
//! bias field from co-registered tissue compartment maps (e.g. the WM, GM
//! and CSF outputs of multi-tissue CSD). After correction the tissue maps
//! sum to a common target value inside the mask.
//!
//! - `mask`: mask refinement against a summed signal
//! - `basis`: third-order polynomial basis in scanner coordinates
//! - `scale`: per-tissue scale factors by least squares
//! - `outlier`: quartile-fence outlier rejection in the log domain
//! - `bias_field`: polynomial bias field fit and reconstruction
//! - `pipeline`: the outer/inner iteration schedule
//! - `compose`: corrected output maps

pub mod basis;
pub mod bias_field;
pub mod compose;
pub mod mask;
pub mod outlier;
pub mod pipeline;
pub mod scale;

pub use basis::{basis_function, BASIS_SIZE};
pub use bias_field::BiasField;
pub use compose::{correct_tissue, correct_tissues};
pub use pipeline::{mtnormalise, mtnormalise_with_progress, NormalizeOutput, PassReport};

use crate::error::{MtnormError, Result};

/// Default value the summed tissue compartments are normalised to: sqrt(1/(4*pi))
pub const DEFAULT_NORM_VALUE: f64 = 0.282094;

/// Default iteration budget, used for both the outer and the inner loop
pub const DEFAULT_MAX_ITER: usize = 10;

/// Quartile fence multiplier for outlier rejection
pub const OUTLIER_FENCE_MULTIPLIER: f64 = 1.6;

/// Mean relative change of the scale factors below which they are settled
pub const CONVERGENCE_THRESHOLD: f64 = 0.001;

/// Parameters for multi-tissue normalisation
#[derive(Clone, Debug)]
pub struct NormalizeParams {
    /// Value the summed, corrected tissue maps are normalised to (default sqrt(1/(4*pi)))
    pub norm_value: f64,
    /// Iteration budget for both loops (default 10, must be at least 2)
    pub max_iter: usize,
    /// Keep a distinct scale factor per tissue instead of one shared factor
    pub independent: bool,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            norm_value: DEFAULT_NORM_VALUE,
            max_iter: DEFAULT_MAX_ITER,
            independent: false,
        }
    }
}

impl NormalizeParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.norm_value.is_finite() && self.norm_value > 0.0) {
            return Err(MtnormError::InvalidArgument(format!(
                "intensity normalisation value must be strictly positive, got {}",
                self.norm_value
            )));
        }
        // The outer loop runs max_iter - 1 times; fewer than two would never solve anything
        if self.max_iter < 2 {
            return Err(MtnormError::InvalidArgument(format!(
                "number of iterations must be at least 2, got {}",
                self.max_iter
            )));
        }
        Ok(())
    }
}
