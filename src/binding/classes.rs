use crate::engine::marshal::flatten_column_major;
use crate::error::ValidationError;
use crate::io::volume::{DataType, Volume};
use crate::io::{load_volume, save_volume, VolumeSource};
use nalgebra::Matrix4;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::path::PathBuf;

use super::to_py_err;

/// Python representation of an image volume
///
/// Attributes:
///     shape (list[int]): Voxel grid extents
///     data (list[float]): Voxel values flattened in column-major (Fortran) order
///     affine (list[list[float]]): 4x4 voxel-to-world transform
///     cal_min (float): Display range minimum
///     cal_max (float): Display range maximum
///     datatype (str): Storage type used when saving (uint8, int16, int32, float32, float64)
///
/// Example:
///     >>> vol = PyVolume.load("sub-01_T1map.nii.gz")
///     >>> vol.shape
///     [176, 240, 256]
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyVolume {
    #[pyo3(get)]
    pub shape: Vec<usize>,
    #[pyo3(get, set)]
    pub data: Vec<f64>,
    #[pyo3(get, set)]
    pub affine: [[f64; 4]; 4],
    #[pyo3(get, set)]
    pub cal_min: f64,
    #[pyo3(get, set)]
    pub cal_max: f64,
    #[pyo3(get, set)]
    pub datatype: String,
}

#[pymethods]
impl PyVolume {
    #[new]
    #[pyo3(signature = (data, shape, affine, datatype = "float32"))]
    fn new(data: Vec<f64>, shape: Vec<usize>, affine: [[f64; 4]; 4], datatype: &str) -> PyResult<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PyValueError::new_err(format!(
                "data holds {} values but shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        datatype.parse::<DataType>().map_err(PyValueError::new_err)?;
        Ok(Self {
            shape,
            data,
            affine,
            cal_min: 0.0,
            cal_max: 0.0,
            datatype: datatype.to_string(),
        })
    }

    /// Reads a NIfTI file (``.nii`` or ``.nii.gz``).
    ///
    /// Args:
    ///     path (str): File to read
    ///     log_file (str, optional): Time log receiving the ``read`` entry
    #[staticmethod]
    #[pyo3(signature = (path, log_file = None))]
    fn load(path: PathBuf, log_file: Option<PathBuf>) -> PyResult<Self> {
        let log_file = log_file.unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_LOG_FILE));
        let volume = load_volume(VolumeSource::Path(path), "load_volume", &log_file)
            .map_err(to_py_err)?;
        Ok(PyVolume::from(&volume))
    }

    /// Writes the volume; an existing file is kept unless ``overwrite`` is set.
    #[pyo3(signature = (path, dtype = None, overwrite = true, log_file = None))]
    fn save(
        &self,
        path: PathBuf,
        dtype: Option<&str>,
        overwrite: bool,
        log_file: Option<PathBuf>,
    ) -> PyResult<()> {
        let dtype = dtype
            .map(|d| d.parse::<DataType>().map_err(PyValueError::new_err))
            .transpose()?;
        let log_file = log_file.unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_LOG_FILE));
        let mut volume = Volume::try_from(self).map_err(to_py_err)?;
        save_volume(&path, &mut volume, dtype, overwrite, "save_volume", &log_file)
            .map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "Volume(shape={:?}, datatype={}, cal=[{:.2}, {:.2}])",
            self.shape, self.datatype, self.cal_min, self.cal_max
        )
    }
}

impl From<&Volume> for PyVolume {
    fn from(volume: &Volume) -> Self {
        let mut affine = [[0.0; 4]; 4];
        for (r, row) in affine.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = volume.affine[(r, c)];
            }
        }
        Self {
            shape: volume.shape().to_vec(),
            data: flatten_column_major(&volume.data),
            affine,
            cal_min: volume.header.cal_min,
            cal_max: volume.header.cal_max,
            datatype: volume.header.datatype.to_string(),
        }
    }
}

impl TryFrom<&PyVolume> for Volume {
    type Error = crate::error::Error;

    fn try_from(py_vol: &PyVolume) -> Result<Self, Self::Error> {
        let data = ArrayD::from_shape_vec(IxDyn(&py_vol.shape).f(), py_vol.data.clone())
            .map_err(|e| ValidationError::InvalidVolumeInput(e.to_string()))?;
        let affine = Matrix4::from_fn(|r, c| py_vol.affine[r][c]);
        let mut volume = Volume::new(data, affine);
        volume.header.cal_min = py_vol.cal_min;
        volume.header.cal_max = py_vol.cal_max;
        volume.header.datatype = py_vol
            .datatype
            .parse()
            .map_err(ValidationError::InvalidVolumeInput)?;
        Ok(volume)
    }
}

/// Accepts a file path (``str`` or ``os.PathLike``) or a ``PyVolume``.
pub fn volume_source(obj: &Bound<'_, PyAny>) -> Result<VolumeSource, crate::error::Error> {
    if let Ok(path) = obj.extract::<PathBuf>() {
        return Ok(VolumeSource::Path(path));
    }
    if let Ok(py_vol) = obj.downcast::<PyVolume>() {
        return Ok(VolumeSource::Memory(Volume::try_from(&*py_vol.borrow())?));
    }
    let type_name = obj
        .get_type()
        .name()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    Err(ValidationError::InvalidVolumeInput(type_name).into())
}
