//! Error type shared by the estimation core, the NIfTI collaborator and the CLI

use std::path::PathBuf;

use thiserror::Error;

/// Broad class of a failure, used by the CLI to report and by tests to check
/// that a failure was detected at the right stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments, detected before any computation
    Configuration,
    /// The statistical model does not apply to the input data
    Data,
    /// A least-squares solve failed or produced non-finite values
    Numerical,
    /// Reading or writing image files
    Io,
}

#[derive(Debug, Error)]
pub enum MtnormError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("output file '{0}' already exists (use --force to overwrite)")]
    OutputExists(PathBuf),

    #[error("error in automatic mask generation: mask contains no voxels")]
    EmptyMask,

    #[error(
        "non-positive tissue intensity normalisation scale factor was computed \
         (tissue index: {tissue}, scale factor: {value}); needs to be strictly positive"
    )]
    NonPositiveScaleFactor { tissue: usize, value: f64 },

    #[error("least-squares solve failed: {0}")]
    Numerical(String),

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MtnormError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MtnormError::InvalidArgument(_)
            | MtnormError::DimensionMismatch(_)
            | MtnormError::OutputExists(_) => ErrorKind::Configuration,
            MtnormError::EmptyMask | MtnormError::NonPositiveScaleFactor { .. } => ErrorKind::Data,
            MtnormError::Numerical(_) => ErrorKind::Numerical,
            MtnormError::Nifti(_) | MtnormError::Io { .. } => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, MtnormError>;
