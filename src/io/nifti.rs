//! Minimal single-file NIfTI-1 codec (`.nii` and `.nii.gz`).
//!
//! Only what the orchestrators need is kept: dimensions, datatype, pixdim,
//! scaling, display range, description, and the sform/qform affine.

use super::volume::{DataType, Header, Volume};
use crate::error::NiftiError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nalgebra::Matrix4;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::io::{Read, Write};

const HEADER_SIZE: usize = 348;
/// Start of voxel data in files written here.
const DATA_OFFSET: usize = 352;

mod offsets {
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const XYZT_UNITS: usize = 123;
    pub const CAL_MAX: usize = 124;
    pub const CAL_MIN: usize = 128;
    pub const DESCRIP: usize = 148;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const QUATERN_B: usize = 256;
    pub const QOFFSET_X: usize = 268;
    pub const SROW_X: usize = 280;
    pub const MAGIC: usize = 344;
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Decodes a complete file image already held in memory. Gzip is detected
/// from the magic bytes rather than the file name.
pub fn decode(bytes: &[u8]) -> Result<Volume, NiftiError> {
    if is_gzip(bytes) {
        let mut raw = Vec::new();
        MultiGzDecoder::new(bytes).read_to_end(&mut raw)?;
        return decode_raw(&raw);
    }
    decode_raw(bytes)
}

fn decode_raw(bytes: &[u8]) -> Result<Volume, NiftiError> {
    if bytes.len() < HEADER_SIZE {
        return Err(NiftiError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        decode_with::<LittleEndian>(bytes)
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        decode_with::<BigEndian>(bytes)
    } else {
        Err(NiftiError::BadHeaderSize(LittleEndian::read_i32(&bytes[0..4])))
    }
}

fn decode_with<E: ByteOrder>(bytes: &[u8]) -> Result<Volume, NiftiError> {
    use offsets::*;

    let magic = &bytes[MAGIC..MAGIC + 4];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(NiftiError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
    }

    let ndim = E::read_i16(&bytes[DIM..DIM + 2]).clamp(1, 7) as usize;
    let shape: Vec<usize> = (1..=ndim)
        .map(|i| E::read_i16(&bytes[DIM + 2 * i..DIM + 2 * i + 2]).max(1) as usize)
        .collect();

    let code = E::read_i16(&bytes[DATATYPE..DATATYPE + 2]);
    let datatype = DataType::from_code(code).ok_or(NiftiError::UnsupportedDatatype(code))?;

    let pixdim: Vec<f64> = (0..8)
        .map(|i| E::read_f32(&bytes[PIXDIM + 4 * i..PIXDIM + 4 * i + 4]) as f64)
        .collect();

    let vox_offset = E::read_f32(&bytes[VOX_OFFSET..VOX_OFFSET + 4]);
    if !vox_offset.is_finite() || vox_offset < 0.0 || vox_offset as f64 > bytes.len() as f64 {
        return Err(NiftiError::BadVoxOffset(vox_offset));
    }
    let offset = (vox_offset as usize).max(HEADER_SIZE);
    let oversized = || NiftiError::Oversized(format!("dimensions {:?}", shape));
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(oversized)?;
    let needed = count
        .checked_mul(datatype.byte_size())
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(oversized)?;
    if bytes.len() < needed {
        return Err(NiftiError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    let slope = E::read_f32(&bytes[SCL_SLOPE..SCL_SLOPE + 4]) as f64;
    let inter = E::read_f32(&bytes[SCL_INTER..SCL_INTER + 4]) as f64;
    let scaled = slope != 0.0 && !(slope == 1.0 && inter == 0.0);

    let raw = &bytes[offset..needed];
    let width = datatype.byte_size();
    let values: Vec<f64> = raw
        .chunks_exact(width)
        .map(|chunk| {
            let v = match datatype {
                DataType::UInt8 => chunk[0] as f64,
                DataType::Int16 => E::read_i16(chunk) as f64,
                DataType::Int32 => E::read_i32(chunk) as f64,
                DataType::Float32 => E::read_f32(chunk) as f64,
                DataType::Float64 => E::read_f64(chunk),
            };
            if scaled {
                v * slope + inter
            } else {
                v
            }
        })
        .collect();

    // voxel data on disk varies the first index fastest
    let data = ArrayD::from_shape_vec(IxDyn(&shape).f(), values).map_err(|_| {
        NiftiError::Truncated {
            needed,
            available: bytes.len(),
        }
    })?;

    let descrip_raw = &bytes[DESCRIP..DESCRIP + 80];
    let end = descrip_raw.iter().position(|&b| b == 0).unwrap_or(80);
    let header = Header {
        zooms: pixdim[1..=ndim].iter().map(|z| z.abs()).collect(),
        cal_min: E::read_f32(&bytes[CAL_MIN..CAL_MIN + 4]) as f64,
        cal_max: E::read_f32(&bytes[CAL_MAX..CAL_MAX + 4]) as f64,
        datatype,
        descrip: String::from_utf8_lossy(&descrip_raw[..end]).into_owned(),
    };

    let affine = read_affine::<E>(bytes, &pixdim);
    Ok(Volume::with_header(data, affine, header))
}

fn read_affine<E: ByteOrder>(bytes: &[u8], pixdim: &[f64]) -> Matrix4<f64> {
    use offsets::*;

    let f = |at: usize| E::read_f32(&bytes[at..at + 4]) as f64;
    let sform_code = E::read_i16(&bytes[SFORM_CODE..SFORM_CODE + 2]);
    let qform_code = E::read_i16(&bytes[QFORM_CODE..QFORM_CODE + 2]);

    if sform_code > 0 {
        let mut m = Matrix4::identity();
        for row in 0..3 {
            for col in 0..4 {
                m[(row, col)] = f(SROW_X + 16 * row + 4 * col);
            }
        }
        m
    } else if qform_code > 0 {
        let (b, c, d) = (f(QUATERN_B), f(QUATERN_B + 4), f(QUATERN_B + 8));
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let (i, j, k) = (pixdim[1].abs(), pixdim[2].abs(), pixdim[3].abs() * qfac);
        Matrix4::new(
            (a * a + b * b - c * c - d * d) * i,
            2.0 * (b * c - a * d) * j,
            2.0 * (b * d + a * c) * k,
            f(QOFFSET_X),
            2.0 * (b * c + a * d) * i,
            (a * a - b * b + c * c - d * d) * j,
            2.0 * (c * d - a * b) * k,
            f(QOFFSET_X + 4),
            2.0 * (b * d - a * c) * i,
            2.0 * (c * d + a * b) * j,
            (a * a - b * b - c * c + d * d) * k,
            f(QOFFSET_X + 8),
            0.0,
            0.0,
            0.0,
            1.0,
        )
    } else {
        let mut m = Matrix4::identity();
        for axis in 0..3 {
            m[(axis, axis)] = if pixdim[axis + 1] == 0.0 {
                1.0
            } else {
                pixdim[axis + 1]
            };
        }
        m
    }
}

/// Encodes a volume as little-endian NIfTI-1 with the header's storage type.
/// Values are cast (rounded for integer types) on the way out.
pub fn encode(volume: &Volume) -> Result<Vec<u8>, NiftiError> {
    use offsets::*;

    let ndim = volume.data.ndim();
    if ndim == 0 || ndim > 7 {
        return Err(NiftiError::BadRank(ndim));
    }
    let datatype = volume.header.datatype;
    let count = volume.data.len();
    if let Some(&extent) = volume.data.shape().iter().find(|&&e| e > i16::MAX as usize) {
        return Err(NiftiError::Oversized(format!(
            "extent {} exceeds the NIfTI-1 limit of {}",
            extent,
            i16::MAX
        )));
    }
    let mut buf = vec![0u8; DATA_OFFSET + count * datatype.byte_size()];

    LittleEndian::write_i32(&mut buf[0..4], HEADER_SIZE as i32);
    LittleEndian::write_i16(&mut buf[DIM..DIM + 2], ndim as i16);
    for i in 0..7 {
        let extent = volume.data.shape().get(i).copied().unwrap_or(1);
        let at = DIM + 2 + 2 * i;
        LittleEndian::write_i16(&mut buf[at..at + 2], extent as i16);
    }
    LittleEndian::write_i16(&mut buf[DATATYPE..DATATYPE + 2], datatype.code());
    LittleEndian::write_i16(&mut buf[BITPIX..BITPIX + 2], (datatype.byte_size() * 8) as i16);

    LittleEndian::write_f32(&mut buf[PIXDIM..PIXDIM + 4], 1.0);
    for i in 0..7 {
        let z = volume.header.zooms.get(i).copied().unwrap_or(1.0);
        let at = PIXDIM + 4 + 4 * i;
        LittleEndian::write_f32(&mut buf[at..at + 4], z as f32);
    }
    LittleEndian::write_f32(&mut buf[VOX_OFFSET..VOX_OFFSET + 4], DATA_OFFSET as f32);
    LittleEndian::write_f32(&mut buf[SCL_SLOPE..SCL_SLOPE + 4], 1.0);
    // millimetres, seconds
    buf[XYZT_UNITS] = 2 | 8;
    LittleEndian::write_f32(&mut buf[CAL_MAX..CAL_MAX + 4], volume.header.cal_max as f32);
    LittleEndian::write_f32(&mut buf[CAL_MIN..CAL_MIN + 4], volume.header.cal_min as f32);

    let descrip = volume.header.descrip.as_bytes();
    let len = descrip.len().min(79);
    buf[DESCRIP..DESCRIP + len].copy_from_slice(&descrip[..len]);

    LittleEndian::write_i16(&mut buf[SFORM_CODE..SFORM_CODE + 2], 2);
    for row in 0..3 {
        for col in 0..4 {
            let at = SROW_X + 16 * row + 4 * col;
            LittleEndian::write_f32(&mut buf[at..at + 4], volume.affine[(row, col)] as f32);
        }
    }
    buf[MAGIC..MAGIC + 4].copy_from_slice(b"n+1\0");

    let width = datatype.byte_size();
    let body = &mut buf[DATA_OFFSET..];
    // reversed-axes view iterates the first index fastest
    for (chunk, &v) in body.chunks_exact_mut(width).zip(volume.data.t().iter()) {
        match datatype {
            DataType::UInt8 => chunk[0] = v.round().clamp(0.0, u8::MAX as f64) as u8,
            DataType::Int16 => LittleEndian::write_i16(chunk, v.round() as i16),
            DataType::Int32 => LittleEndian::write_i32(chunk, v.round() as i32),
            DataType::Float32 => LittleEndian::write_f32(chunk, v as f32),
            DataType::Float64 => LittleEndian::write_f64(chunk, v),
        }
    }
    Ok(buf)
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, NiftiError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}
