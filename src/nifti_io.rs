//! NIfTI file I/O
//!
//! Loads 3D and 4D NIfTI-1 volumes (gzip auto-detected) into flat Fortran
//! ordered buffers and writes float32 NIfTI-1 files, optionally gzipped.
//! The header description field carries per-output metadata such as the
//! applied normalisation scale factor.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{MtnormError, Result};
use crate::volume::Grid;

/// Key written into the header description of corrected outputs
pub const SCALE_FACTOR_KEY: &str = "normalisation_scale_factor";

/// Length of the NIfTI-1 `descrip` field
const DESCRIP_LEN: usize = 80;

/// NIfTI volume as a flat buffer
#[derive(Clone, Debug)]
pub struct NiftiData {
    /// Volume data as f64, frame after frame
    pub data: Vec<f64>,
    /// Spatial dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Number of 3D frames (1 for a 3D volume)
    pub frames: usize,
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
    /// Data scaling slope
    pub scl_slope: f64,
    /// Data scaling intercept
    pub scl_inter: f64,
    /// Header description text
    pub description: String,
}

impl NiftiData {
    /// Volume on `grid` with an empty description
    pub fn on_grid(grid: &Grid, data: Vec<f64>, frames: usize) -> Self {
        Self {
            data,
            dims: grid.dims,
            frames,
            voxel_size: grid.voxel_size,
            affine: grid.affine,
            scl_slope: 1.0,
            scl_inter: 0.0,
            description: String::new(),
        }
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.dims, self.voxel_size, self.affine)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Header description recording an applied scale factor
pub fn scale_factor_description(scale: f64) -> String {
    format!("{}={}", SCALE_FACTOR_KEY, scale)
}

/// Scale factor recorded by [`scale_factor_description`], if any
pub fn parse_scale_factor(description: &str) -> Option<f64> {
    description
        .trim()
        .strip_prefix(SCALE_FACTOR_KEY)?
        .strip_prefix('=')?
        .parse()
        .ok()
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn read_object(bytes: &[u8]) -> Result<InMemNiftiObject> {
    if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if GzDecoder::new(Cursor::new(bytes))
                .read_to_end(&mut decompressed)
                .is_ok()
            {
                get_header_info(&decompressed)
            } else {
                "could not decompress".to_string()
            };
            MtnormError::Nifti(format!("failed to read gzipped NIfTI: {} ({})", e, info))
        })
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(|e| {
            MtnormError::Nifti(format!("failed to read NIfTI: {} ({})", e, get_header_info(bytes)))
        })
    }
}

/// Load a 3D or 4D NIfTI volume from bytes
///
/// Supports both .nii and .nii.gz files (gzip is auto-detected). Data are
/// returned in Fortran order, frame after frame, with the header scaling
/// already applied.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData> {
    let obj = read_object(bytes)?;
    let header = obj.header();

    let ndim = header.dim[0] as usize;
    if !(3..=4).contains(&ndim) {
        return Err(MtnormError::Nifti(format!(
            "expected a 3D or 4D volume, got {}D",
            ndim
        )));
    }

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = get_affine(header);
    let description = header_description(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| MtnormError::Nifti(format!("failed to convert to ndarray: {}", e)))?;

    // Use the actual array shape for dimensions (nifti-rs drops trailing unit dims)
    let shape = array.shape().to_vec();
    if shape.len() < 3 || shape.len() > 4 {
        return Err(MtnormError::Nifti(format!(
            "expected a 3D or 4D array, got {}D",
            shape.len()
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let frames = if shape.len() == 4 { shape[3] } else { 1 };

    // index = x + y*nx + z*nx*ny + t*nx*ny*nz
    let mut data = Vec::with_capacity(nx * ny * nz * frames);
    if shape.len() == 3 {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(array[[i, j, k]]);
                }
            }
        }
    } else {
        for t in 0..frames {
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        data.push(array[[i, j, k, t]]);
                    }
                }
            }
        }
    }

    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        frames,
        voxel_size,
        affine,
        scl_slope,
        scl_inter,
        description,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

fn header_description(header: &NiftiHeader) -> String {
    let raw: &[u8] = &header.descrip;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// Save data as NIfTI bytes
///
/// Writes an uncompressed float32 .nii file, 4D when `frames > 1`.
pub fn save_nifti(nii: &NiftiData) -> Result<Vec<u8>> {
    let (nx, ny, nz) = nii.dims;
    let (vsx, vsy, vsz) = nii.voxel_size;
    let frames = nii.frames.max(1);
    let expected = nx * ny * nz * frames;
    if nii.data.len() != expected {
        return Err(MtnormError::Nifti(format!(
            "data has {} values, header describes {}",
            nii.data.len(),
            expected
        )));
    }
    for (axis, &d) in [nx, ny, nz, frames].iter().enumerate() {
        if d > i16::MAX as usize {
            return Err(MtnormError::Nifti(format!(
                "dimension {} too large for NIfTI-1 ({})",
                axis, d
            )));
        }
    }

    // Create NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let ndim: i16 = if frames > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, frames as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // descrip, truncated to leave a terminating NUL
    let descrip = nii.description.as_bytes();
    let len = descrip.len().min(DESCRIP_LEN - 1);
    header[148..148 + len].copy_from_slice(&descrip[..len]);

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for i in 0..4 {
            let offset = 280 + row * 16 + i * 4;
            header[offset..offset + 4].copy_from_slice(&(nii.affine[row * 4 + i] as f32).to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + nii.data.len() * 4);
    buffer.extend_from_slice(&header);
    // Extension flag (4 bytes, all zeros = no extension)
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in &nii.data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }

    Ok(buffer)
}

/// Save data as gzipped NIfTI bytes (.nii.gz)
pub fn save_nifti_gz(nii: &NiftiData) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let uncompressed = save_nifti(nii)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| MtnormError::Nifti(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| MtnormError::Nifti(format!("gzip finish failed: {}", e)))
}

/// Read a NIfTI file from a filesystem path
///
/// Supports both .nii and .nii.gz files.
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    let bytes = std::fs::read(path).map_err(|source| MtnormError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_nifti(&bytes)
}

/// Save NIfTI data to a file
///
/// If the path ends with .nii.gz, the file is gzip compressed.
/// Otherwise it is saved as uncompressed .nii.
pub fn save_nifti_to_file(path: &Path, nii: &NiftiData) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(nii)?
    } else {
        save_nifti(nii)?
    };

    std::fs::write(path, &bytes).map_err(|source| MtnormError::Io {
        path: path.to_path_buf(),
        source,
    })
}
