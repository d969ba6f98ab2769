//! Command-line front end
//!
//! ```text
//! mtnorm IN1 OUT1 IN2 OUT2 [...] --mask MASK [--value V] [--bias B]
//!        [--independent] [--maxiter N] [--check C] [--force]
//! ```
//!
//! Every input is validated and the full estimate is run before any output
//! file is written.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use crate::error::{MtnormError, Result};
use crate::nifti_io::{read_nifti_file, save_nifti_to_file, scale_factor_description, NiftiData};
use crate::normalize::mask::mask_from_values;
use crate::normalize::{mtnormalise, NormalizeOutput, NormalizeParams, DEFAULT_MAX_ITER, DEFAULT_NORM_VALUE};
use crate::volume::{Grid, TissueMap};

#[derive(Parser, Debug)]
#[command(
    name = "mtnorm",
    about = "Multi-tissue informed log-domain intensity normalisation",
    long_about = "Jointly estimates per-tissue scale factors and a smooth multiplicative \
                  bias field from co-registered tissue compartment maps, and writes the \
                  corrected maps so that they sum to the normalisation value."
)]
pub struct Cli {
    /// Input and output tissue maps, given as pairs: IN1 OUT1 IN2 OUT2 ...
    #[arg(value_name = "INPUT OUTPUT", required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Mask restricting the voxels used for estimation
    #[arg(long)]
    pub mask: PathBuf,

    /// Value the summed tissue compartments are normalised to
    #[arg(long, default_value_t = DEFAULT_NORM_VALUE)]
    pub value: f64,

    /// Write the estimated bias field to this image
    #[arg(long)]
    pub bias: Option<PathBuf>,

    /// Keep a distinct scale factor per tissue
    #[arg(long)]
    pub independent: bool,

    /// Iteration budget for the outer and inner loops
    #[arg(long, default_value_t = DEFAULT_MAX_ITER)]
    pub maxiter: usize,

    /// Write the final outlier-rejection mask to this image
    #[arg(long)]
    pub check: Option<PathBuf>,

    /// Overwrite existing output files
    #[arg(long)]
    pub force: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn params(&self) -> NormalizeParams {
        NormalizeParams {
            norm_value: self.value,
            max_iter: self.maxiter,
            independent: self.independent,
        }
    }

    /// Every file the run would write
    pub fn outputs(&self) -> Vec<&Path> {
        let mut outputs: Vec<&Path> = self.files.iter().skip(1).step_by(2).map(|p| p.as_path()).collect();
        outputs.extend(self.bias.as_deref());
        outputs.extend(self.check.as_deref());
        outputs
    }
}

/// Split the positional arguments into (input, output) pairs
pub fn split_io_pairs(files: &[PathBuf]) -> Result<Vec<(&Path, &Path)>> {
    if files.is_empty() || files.len() % 2 != 0 {
        return Err(MtnormError::InvalidArgument(
            "non-pair number of input/output files provided".to_string(),
        ));
    }
    if files.len() < 4 {
        return Err(MtnormError::InvalidArgument(
            "at least two tissue types must be provided".to_string(),
        ));
    }
    Ok(files
        .chunks_exact(2)
        .map(|pair| (pair[0].as_path(), pair[1].as_path()))
        .collect())
}

fn check_outputs(paths: &[&Path], force: bool) -> Result<()> {
    if force {
        return Ok(());
    }
    match paths.iter().find(|p| p.exists()) {
        Some(existing) => Err(MtnormError::OutputExists(existing.to_path_buf())),
        None => Ok(()),
    }
}

fn check_same_grid(reference: &NiftiData, other: &NiftiData, what: &Path) -> Result<()> {
    if reference.dims != other.dims {
        return Err(MtnormError::DimensionMismatch(format!(
            "'{}' is {}x{}x{}, expected {}x{}x{}",
            what.display(),
            other.dims.0,
            other.dims.1,
            other.dims.2,
            reference.dims.0,
            reference.dims.1,
            reference.dims.2
        )));
    }
    Ok(())
}

/// Loaded inputs, ready for estimation
struct Inputs {
    volumes: Vec<NiftiData>,
    tissues: Vec<TissueMap>,
    mask: Vec<bool>,
    grid: Grid,
}

fn load_inputs(pairs: &[(&Path, &Path)], mask_path: &Path) -> Result<Inputs> {
    let mut volumes = Vec::with_capacity(pairs.len());
    for (input, _) in pairs {
        info!("loading {}", input.display());
        let nii = read_nifti_file(input)?;
        if let Some(first) = volumes.first() {
            check_same_grid(first, &nii, input)?;
        }
        volumes.push(nii);
    }
    let Some(reference) = volumes.first() else {
        return Err(MtnormError::InvalidArgument("no input files provided".to_string()));
    };
    let grid = reference.grid();

    let mask_nii = read_nifti_file(mask_path)?;
    check_same_grid(reference, &mask_nii, mask_path)?;
    let mask = mask_from_values(&mask_nii.data[..grid.len()]);

    let tissues = volumes
        .iter()
        .map(|v| TissueMap::new(v.data.clone(), v.frames))
        .collect();

    Ok(Inputs { volumes, tissues, mask, grid })
}

fn write_outputs(cli: &Cli, pairs: &[(&Path, &Path)], inputs: &Inputs, out: NormalizeOutput) -> Result<()> {
    for (((_, output), source), (corrected, scale)) in pairs
        .iter()
        .zip(&inputs.volumes)
        .zip(out.corrected.into_iter().zip(&out.scale_factors))
    {
        let nii = NiftiData::on_grid(&inputs.grid, corrected, source.frames)
            .with_description(scale_factor_description(*scale));
        save_nifti_to_file(output, &nii)?;
        info!("wrote {}", output.display());
    }

    if let Some(path) = &cli.bias {
        let nii = NiftiData::on_grid(&inputs.grid, out.bias_field.image, 1);
        save_nifti_to_file(path, &nii)?;
        info!("wrote bias field to {}", path.display());
    }

    if let Some(path) = &cli.check {
        let mask: Vec<f64> = out.mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
        save_nifti_to_file(path, &NiftiData::on_grid(&inputs.grid, mask, 1))?;
        info!("wrote outlier mask to {}", path.display());
    }

    Ok(())
}

/// Run the command: validate, load, estimate, then write
pub fn run(cli: &Cli) -> Result<NormalizeOutput> {
    let params = cli.params();
    params.validate()?;
    let pairs = split_io_pairs(&cli.files)?;
    check_outputs(&cli.outputs(), cli.force)?;

    let inputs = load_inputs(&pairs, &cli.mask)?;
    let out = mtnormalise(&inputs.tissues, &inputs.mask, &inputs.grid, &params)?;

    write_outputs(cli, &pairs, &inputs, out.clone())?;
    Ok(out)
}
