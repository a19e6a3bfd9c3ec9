use nalgebra::Matrix4;
use ndarray::{ArrayD, IxDyn};
use std::fmt;
use std::str::FromStr;

/// Storage type of the voxel values on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    UInt8,
    Int16,
    Int32,
    #[default]
    Float32,
    Float64,
}

impl DataType {
    pub fn code(self) -> i16 {
        match self {
            DataType::UInt8 => 2,
            DataType::Int16 => 4,
            DataType::Int32 => 8,
            DataType::Float32 => 16,
            DataType::Float64 => 64,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(DataType::UInt8),
            4 => Some(DataType::Int16),
            8 => Some(DataType::Int32),
            16 => Some(DataType::Float32),
            64 => Some(DataType::Float64),
            _ => None,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::UInt8 | DataType::Int16 | DataType::Int32)
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uint8" | "u8" => Ok(DataType::UInt8),
            "int16" | "i16" => Ok(DataType::Int16),
            "int32" | "i32" => Ok(DataType::Int32),
            "float32" | "f32" => Ok(DataType::Float32),
            "float64" | "f64" => Ok(DataType::Float64),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// The subset of image header metadata the orchestrators read or rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Physical voxel size per axis (mm for spatial axes).
    pub zooms: Vec<f64>,
    pub cal_min: f64,
    pub cal_max: f64,
    pub datatype: DataType,
    pub descrip: String,
}

impl Header {
    pub fn with_zooms(zooms: Vec<f64>) -> Self {
        Self {
            zooms,
            cal_min: 0.0,
            cal_max: 0.0,
            datatype: DataType::default(),
            descrip: String::new(),
        }
    }

    /// Spacing of the three spatial axes; missing entries count as 1 mm.
    pub fn spatial_zooms(&self) -> [f64; 3] {
        let mut out = [1.0; 3];
        for (slot, z) in out.iter_mut().zip(self.zooms.iter()) {
            *slot = *z;
        }
        out
    }
}

/// A spatial image: voxel array, voxel-to-world affine and header.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: ArrayD<f64>,
    pub affine: Matrix4<f64>,
    pub header: Header,
}

impl Volume {
    /// Builds a volume whose header zooms are taken from the affine's column norms.
    pub fn new(data: ArrayD<f64>, affine: Matrix4<f64>) -> Self {
        let mut zooms: Vec<f64> = (0..3)
            .map(|j| affine.fixed_view::<3, 1>(0, j).norm())
            .take(data.ndim().min(3))
            .collect();
        zooms.resize(data.ndim(), 1.0);
        Self {
            data,
            affine,
            header: Header::with_zooms(zooms),
        }
    }

    pub fn with_header(data: ArrayD<f64>, affine: Matrix4<f64>, header: Header) -> Self {
        Self {
            data,
            affine,
            header,
        }
    }

    /// A volume filled with `value`, handy for masks and constant priors.
    pub fn filled(shape: &[usize], value: f64, affine: Matrix4<f64>) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value), affine)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Largest finite value, ignoring NaNs. Empty or all-NaN arrays give NaN.
    pub fn nanmax(&self) -> f64 {
        nanmax(self.data.iter().copied())
    }

    pub fn max(&self) -> f64 {
        self.data
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, |acc, v| if v > acc || v.is_nan() { v } else { acc })
    }

    pub fn set_data_dtype(&mut self, dtype: DataType) {
        self.header.datatype = dtype;
    }
}

pub fn nanmax<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}
