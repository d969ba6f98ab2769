//! mtnorm: multi-tissue informed log-domain intensity normalisation
//!
//! This crate corrects a set of co-registered tissue compartment maps (for
//! example the WM/GM/CSF outputs of multi-tissue CSD) for a smooth
//! multiplicative bias field and normalises them with global scale factors.
//!
//! # Modules
//! - `normalize`: joint scale factor and bias field estimation
//! - `solvers`: dense least squares
//! - `volume`: voxel grid and tissue buffers
//! - `nifti_io`: NIfTI read/write
//! - `cli`: command-line front end

// Core modules
pub mod error;
pub mod volume;

// Algorithm modules
pub mod normalize;
pub mod solvers;

// I/O modules
pub mod cli;
pub mod nifti_io;

pub use error::{ErrorKind, MtnormError, Result};
pub use normalize::{mtnormalise, mtnormalise_with_progress, NormalizeOutput, NormalizeParams};
pub use volume::{Grid, TissueMap};
