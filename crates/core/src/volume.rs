//! Volume images and single-file NIfTI-1 (`.nii`) interop.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{DMat4, DVec4};
use surfing_geometry::{write_atomic, GridGeometry};
use tracing::info;

use crate::error::SurfingError;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;

/// Scalar image on a grid. With time points, volumes are stored one after
/// another, each in the grid's C-order linear index.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeImage {
    geometry: GridGeometry,
    data: Vec<f32>,
}

impl VolumeImage {
    pub fn new(geometry: GridGeometry, data: Vec<f32>) -> Result<Self, SurfingError> {
        let expected = geometry.nvoxels() * geometry.ntimepoints().unwrap_or(1);
        if data.len() != expected {
            return Err(SurfingError::ImageSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { geometry, data })
    }

    /// Zero-filled image on `geometry`.
    pub fn empty(geometry: GridGeometry) -> Self {
        let len = geometry.nvoxels() * geometry.ntimepoints().unwrap_or(1);
        Self {
            geometry,
            data: vec![0.0; len],
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn nvolumes(&self) -> usize {
        self.geometry.ntimepoints().unwrap_or(1)
    }

    pub fn volume(&self, t: usize) -> Option<&[f32]> {
        let n = self.geometry.nvoxels();
        self.data.get(t * n..(t + 1) * n)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    pub fn read_nifti(path: impl AsRef<Path>) -> Result<Self, SurfingError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let image = decode(&bytes).map_err(|message| SurfingError::Nifti {
            path: path.to_path_buf(),
            message,
        })?;
        info!(
            path = %path.display(),
            shape = ?image.geometry.shape(),
            volumes = image.nvolumes(),
            "read nifti"
        );
        Ok(image)
    }

    /// Writes a float32 image with the affine stored as sform.
    pub fn write_nifti(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<(), SurfingError> {
        let path = path.as_ref();
        write_atomic(path, overwrite, |w| encode(w, self))?;
        info!(path = %path.display(), shape = ?self.geometry.shape(), "wrote nifti");
        Ok(())
    }
}

impl From<&VolumeImage> for GridGeometry {
    fn from(image: &VolumeImage) -> Self {
        image.geometry.clone()
    }
}

/// Geometry of a `.nii` file.
pub fn read_geometry(path: impl AsRef<Path>) -> Result<GridGeometry, SurfingError> {
    Ok(VolumeImage::read_nifti(path)?.geometry)
}

fn encode(w: &mut impl Write, image: &VolumeImage) -> io::Result<()> {
    let grid = &image.geometry;
    let [nx, ny, nz] = grid.shape();
    let nt = grid.ntimepoints();
    let to_dim = |n: usize| {
        i16::try_from(n).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("extent {n} too large for nifti"))
        })
    };

    let mut header = [0u8; VOX_OFFSET];
    LittleEndian::write_i32(&mut header[0..4], HEADER_SIZE as i32);
    header[38] = b'r';

    let mut dim = [1i16; 8];
    dim[0] = if nt.is_some() { 4 } else { 3 };
    dim[1] = to_dim(nx)?;
    dim[2] = to_dim(ny)?;
    dim[3] = to_dim(nz)?;
    dim[4] = to_dim(nt.unwrap_or(1))?;
    LittleEndian::write_i16_into(&dim, &mut header[40..56]);

    LittleEndian::write_i16(&mut header[70..72], DT_FLOAT32);
    LittleEndian::write_i16(&mut header[72..74], 32);

    let [dx, dy, dz] = grid.voxel_size();
    let pixdim = [1.0f32, dx as f32, dy as f32, dz as f32, 1.0, 1.0, 1.0, 1.0];
    LittleEndian::write_f32_into(&pixdim, &mut header[76..108]);
    LittleEndian::write_f32(&mut header[108..112], VOX_OFFSET as f32);
    LittleEndian::write_f32(&mut header[112..116], 1.0);
    // millimetres, seconds
    header[123] = 2 | 8;

    LittleEndian::write_i16(&mut header[252..254], 0);
    LittleEndian::write_i16(&mut header[254..256], 1);
    let rows = grid.affine_rows();
    for (r, row) in rows.iter().take(3).enumerate() {
        let start = 280 + 16 * r;
        let values = row.map(|v| v as f32);
        LittleEndian::write_f32_into(&values, &mut header[start..start + 16]);
    }
    header[344..348].copy_from_slice(b"n+1\0");
    w.write_all(&header)?;

    let nvoxels = grid.nvoxels();
    for t in 0..image.nvolumes() {
        let volume = &image.data[t * nvoxels..(t + 1) * nvoxels];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    w.write_f32::<LittleEndian>(volume[i * ny * nz + j * nz + k])?;
                }
            }
        }
    }
    Ok(())
}

fn decode(bytes: &[u8]) -> Result<VolumeImage, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("file has {} bytes, header needs {HEADER_SIZE}", bytes.len()));
    }
    if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        decode_with::<LittleEndian>(bytes)
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        decode_with::<BigEndian>(bytes)
    } else {
        Err("not a nifti-1 header".to_string())
    }
}

fn decode_with<B: ByteOrder>(bytes: &[u8]) -> Result<VolumeImage, String> {
    if &bytes[344..348] != b"n+1\0" {
        return Err("only single-file (n+1) images are supported".to_string());
    }

    let mut dim = [0i16; 8];
    B::read_i16_into(&bytes[40..56], &mut dim);
    let ndim = dim[0];
    if !(3..=4).contains(&ndim) {
        return Err(format!("expected 3 or 4 dimensions, found {ndim}"));
    }
    let mut shape = Vec::with_capacity(4);
    for &n in &dim[1..=ndim as usize] {
        if n < 1 {
            return Err(format!("invalid extent {n}"));
        }
        shape.push(n as usize);
    }

    let datatype = B::read_i16(&bytes[70..72]);
    let mut pixdim = [0f32; 8];
    B::read_f32_into(&bytes[76..108], &mut pixdim);
    let vox_offset = B::read_f32(&bytes[108..112]);
    if !vox_offset.is_finite() || vox_offset > bytes.len() as f32 {
        return Err(format!("invalid vox_offset {vox_offset}"));
    }
    let vox_offset = vox_offset.max(VOX_OFFSET as f32) as usize;
    let slope = B::read_f32(&bytes[112..116]);
    let inter = B::read_f32(&bytes[116..120]);

    let affine = header_affine::<B>(bytes, &pixdim);
    let geometry = GridGeometry::new(&shape, affine).map_err(|err| err.to_string())?;

    let nvoxels = geometry.nvoxels();
    let nvolumes = geometry.ntimepoints().unwrap_or(1);
    let count = nvoxels
        .checked_mul(nvolumes)
        .ok_or_else(|| "image size overflows".to_string())?;
    let width = match datatype {
        DT_UINT8 => 1,
        DT_INT16 => 2,
        DT_INT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => return Err(format!("unsupported datatype code {other}")),
    };
    let end = count
        .checked_mul(width)
        .and_then(|len| len.checked_add(vox_offset))
        .ok_or_else(|| "image size overflows".to_string())?;
    let payload = bytes
        .get(vox_offset..end)
        .ok_or_else(|| format!("expected {count} voxels of {width} bytes after offset {vox_offset}"))?;

    let mut cursor = Cursor::new(payload);
    let mut raw = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match datatype {
            DT_UINT8 => cursor.read_u8().map(f32::from),
            DT_INT16 => cursor.read_i16::<B>().map(f32::from),
            DT_INT32 => cursor.read_i32::<B>().map(|v| v as f32),
            DT_FLOAT32 => cursor.read_f32::<B>(),
            _ => cursor.read_f64::<B>().map(|v| v as f32),
        }
        .map_err(|err| err.to_string())?;
        raw.push(value);
    }
    if slope != 0.0 && slope.is_finite() && inter.is_finite() {
        for v in &mut raw {
            *v = *v * slope + inter;
        }
    }

    let [nx, ny, nz] = geometry.shape();
    let mut data = vec![0.0f32; count];
    let mut source = raw.into_iter();
    for t in 0..nvolumes {
        let volume = &mut data[t * nvoxels..(t + 1) * nvoxels];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    volume[i * ny * nz + j * nz + k] = source.next().unwrap_or(0.0);
                }
            }
        }
    }

    VolumeImage::new(geometry, data).map_err(|err| err.to_string())
}

/// Voxel-to-world matrix: sform when set, else qform, else plain pixdim
/// scaling.
fn header_affine<B: ByteOrder>(bytes: &[u8], pixdim: &[f32; 8]) -> DMat4 {
    let qform_code = B::read_i16(&bytes[252..254]);
    let sform_code = B::read_i16(&bytes[254..256]);
    let spacing = |axis: usize| {
        let d = pixdim[axis] as f64;
        if d > 0.0 {
            d
        } else {
            1.0
        }
    };

    if sform_code > 0 {
        let mut srow = [0f32; 12];
        B::read_f32_into(&bytes[280..328], &mut srow);
        let s = srow.map(f64::from);
        return DMat4::from_cols_array_2d(&[
            [s[0], s[4], s[8], 0.0],
            [s[1], s[5], s[9], 0.0],
            [s[2], s[6], s[10], 0.0],
            [s[3], s[7], s[11], 1.0],
        ]);
    }

    if qform_code > 0 {
        let mut q = [0f32; 6];
        B::read_f32_into(&bytes[256..280], &mut q);
        let [b, c, d, qx, qy, qz] = q.map(f64::from);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let (dx, dy, dz) = (spacing(1), spacing(2), spacing(3) * qfac);
        return DMat4::from_cols(
            DVec4::new(a * a + b * b - c * c - d * d, 2.0 * (b * c + a * d), 2.0 * (b * d - a * c), 0.0) * dx,
            DVec4::new(2.0 * (b * c - a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d + a * b), 0.0) * dy,
            DVec4::new(2.0 * (b * d + a * c), 2.0 * (c * d - a * b), a * a + d * d - b * b - c * c, 0.0) * dz,
            DVec4::new(qx, qy, qz, 1.0),
        );
    }

    DMat4::from_cols(
        DVec4::new(spacing(1), 0.0, 0.0, 0.0),
        DVec4::new(0.0, spacing(2), 0.0, 0.0),
        DVec4::new(0.0, 0.0, spacing(3), 0.0),
        DVec4::W,
    )
}
