//! Buffer layout shared with the engine: flat arrays in column-major
//! (first index fastest) order. Getting this wrong does not crash anything,
//! it silently scrambles the segmentation.

use crate::error::{EngineError, ValidationError};
use crate::io::volume::Volume;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

/// Voxel counts of the three spatial axes.
pub fn spatial_dims(volume: &Volume) -> Result<[usize; 3], ValidationError> {
    match volume.shape() {
        [x, y, z, ..] => Ok([*x, *y, *z]),
        other => Err(ValidationError::NotVolumetric(other.to_vec())),
    }
}

/// Checks that `volume` lines up voxel-for-voxel with `dims`. Trailing
/// singleton axes are accepted.
pub fn check_dims(volume: &Volume, dims: [usize; 3]) -> Result<(), ValidationError> {
    let shape = volume.shape();
    let same = shape.len() >= 3
        && shape[..3] == dims
        && shape[3..].iter().all(|&extent| extent == 1);
    if same {
        Ok(())
    } else {
        Err(ValidationError::ShapeMismatch {
            expected: dims,
            found: shape.to_vec(),
        })
    }
}

pub fn flatten_column_major(data: &ArrayD<f64>) -> Vec<f64> {
    // the reversed-axes view walks the original first axis fastest
    data.t().iter().copied().collect()
}

/// Integer buffer, truncating toward zero like a plain numeric cast.
pub fn flatten_column_major_i32(data: &ArrayD<f64>) -> Vec<i32> {
    data.t().iter().map(|&v| v as i32).collect()
}

pub fn reshape_column_major(
    buffer: Vec<f64>,
    dims: [usize; 3],
    output: &'static str,
) -> Result<ArrayD<f64>, EngineError> {
    let expected = dims.iter().product::<usize>();
    if buffer.len() != expected {
        return Err(EngineError::BufferLength {
            output,
            expected,
            found: buffer.len(),
        });
    }
    ArrayD::from_shape_vec(IxDyn(&dims).f(), buffer).map_err(|_| EngineError::BufferLength {
        output,
        expected,
        found: 0,
    })
}

/// Values stored as 32-bit integers on the way back from the engine.
pub fn as_int32(data: ArrayD<f64>) -> ArrayD<f64> {
    data.mapv_into(|v| v as i32 as f64)
}

/// Values stored as 32-bit floats on the way back from the engine.
pub fn as_float32(data: ArrayD<f64>) -> ArrayD<f64> {
    data.mapv_into(|v| v as f32 as f64)
}
