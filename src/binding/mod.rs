pub mod classes;
pub mod runtime;

use anyhow::Context;
use crate::atlas::PriorCatalog;
use crate::brain::{mgdm_segmentation, ContrastChannel, MgdmParams};
use crate::config::Settings;
use crate::cortex::{cruise_cortex_extraction, CruiseParams};
use crate::engine::Topology;
use crate::error::Error;
use crate::io::output::{OutputItem, ResultBundle, SaveOptions};
use crate::io::time_log::time_log;
use crate::orientation;
use classes::{volume_source, PyVolume};
use nalgebra::Matrix4;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use runtime::{orientation_names, PyEngineRuntime};
use std::path::PathBuf;

/// Maps a failure to the matching Python exception; the message keeps the
/// whole context chain.
pub fn to_py_err(e: impl Into<anyhow::Error>) -> PyErr {
    let e = e.into();
    let message = format!("{:#}", e);
    match e.downcast_ref::<Error>() {
        Some(Error::Validation(_) | Error::Orientation(_) | Error::Config(_)) => {
            PyValueError::new_err(message)
        }
        Some(Error::Read { .. } | Error::Io(_) | Error::Nifti(_)) => PyIOError::new_err(message),
        _ => PyRuntimeError::new_err(message),
    }
}

fn settings() -> PyResult<Settings> {
    Settings::from_env().map_err(to_py_err)
}

fn bundle_to_dict(py: Python<'_>, bundle: ResultBundle) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new(py);
    for (name, item) in bundle {
        match item {
            OutputItem::Volume(volume) => dict.set_item(name, PyVolume::from(&volume))?,
            OutputItem::File(path) => dict.set_item(name, path.to_string_lossy().into_owned())?,
        }
    }
    Ok(dict.unbind())
}

fn save_options(
    save_data: bool,
    overwrite: bool,
    output_dir: Option<PathBuf>,
    file_name: Option<String>,
    file_extension: Option<String>,
) -> SaveOptions {
    SaveOptions {
        save_data,
        overwrite,
        output_dir,
        file_name,
        file_extension,
    }
}

/// Engine orientation constants for a 4x4 affine.
///
/// Returns:
///     tuple[str, str, str, str]: slice order, then the L/R, A/P and I/S flips
///
/// Example:
///     >>> resolve_orientation(vol.affine)
///     ('AXIAL', 'L2R', 'P2A', 'I2S')
#[pyfunction]
pub fn resolve_orientation(affine: [[f64; 4]; 4]) -> PyResult<(String, String, String, String)> {
    let affine = Matrix4::from_fn(|r, c| affine[r][c]);
    let code = orientation::resolve(&affine).map_err(|e| to_py_err(Error::from(e)))?;
    let [slice, lr, ap, is] = orientation_names(code);
    Ok((slice.into(), lr.into(), ap.into(), is.into()))
}

/// Intensity priors available in an MGDM atlas (the configured default atlas
/// when ``atlas_file`` is omitted).
#[pyfunction]
#[pyo3(signature = (atlas_file = None))]
pub fn intensity_priors(atlas_file: Option<PathBuf>) -> PyResult<Vec<String>> {
    let atlas_file = settings()?.check_atlas_file(atlas_file.as_deref());
    let catalog = PriorCatalog::parse(&atlas_file)
        .with_context(|| format!("reading atlas {}", atlas_file.display()))
        .map_err(to_py_err)?;
    Ok(catalog.priors().to_vec())
}

/// Appends one timing entry to ``log_file`` under ``task_name/op_name``.
#[pyfunction(name = "time_log")]
#[pyo3(signature = (log_file, task_name, op_name, filename, start, end))]
pub fn time_log_py(
    log_file: PathBuf,
    task_name: &str,
    op_name: &str,
    filename: Option<PathBuf>,
    start: f64,
    end: f64,
) -> PyResult<()> {
    time_log(&log_file, task_name, op_name, filename.as_deref(), start, end).map_err(to_py_err)
}

/// Whole-brain MGDM segmentation.
///
/// Arguments:
///
/// - ``engine`` – module exposing ``initVM``, ``JArray`` and the engine classes
/// - ``contrast_image1`` – file path or ``PyVolume``; up to four contrasts
/// - ``contrast_type1`` – intensity prior name from the atlas
/// - ``n_steps`` (default: 5)
/// - ``topology`` (default: "wcs")
/// - ``save_data`` (default: False) – write files and return their paths
///
/// Returns:
///     dict: ``segmentation``, ``labels``, ``memberships``, ``distance``
#[pyfunction(name = "mgdm_segmentation")]
#[pyo3(signature = (
    engine,
    contrast_image1,
    contrast_type1,
    contrast_image2 = None,
    contrast_type2 = None,
    contrast_image3 = None,
    contrast_type3 = None,
    contrast_image4 = None,
    contrast_type4 = None,
    n_steps = 5usize,
    topology = "wcs",
    atlas_file = None,
    topology_lut_dir = None,
    adjust_intensity_priors = false,
    compute_posterior = false,
    diffuse_probabilities = false,
    save_data = false,
    output_dir = None,
    file_name = None,
    file_extension = None,
    log_file = None
))]
#[allow(clippy::too_many_arguments)]
pub fn mgdm_segmentation_py(
    py: Python<'_>,
    engine: Py<PyAny>,
    contrast_image1: &Bound<'_, PyAny>,
    contrast_type1: &str,
    contrast_image2: Option<&Bound<'_, PyAny>>,
    contrast_type2: Option<String>,
    contrast_image3: Option<&Bound<'_, PyAny>>,
    contrast_type3: Option<String>,
    contrast_image4: Option<&Bound<'_, PyAny>>,
    contrast_type4: Option<String>,
    n_steps: usize,
    topology: &str,
    atlas_file: Option<PathBuf>,
    topology_lut_dir: Option<PathBuf>,
    adjust_intensity_priors: bool,
    compute_posterior: bool,
    diffuse_probabilities: bool,
    save_data: bool,
    output_dir: Option<PathBuf>,
    file_name: Option<String>,
    file_extension: Option<String>,
    log_file: Option<PathBuf>,
) -> PyResult<Py<PyDict>> {
    let mut params = MgdmParams::new(
        volume_source(contrast_image1).map_err(to_py_err)?,
        contrast_type1,
    );
    let extra = [
        (contrast_image2, contrast_type2),
        (contrast_image3, contrast_type3),
        (contrast_image4, contrast_type4),
    ];
    for (slot, (image, kind)) in extra.into_iter().enumerate() {
        let image = image.map(volume_source).transpose().map_err(to_py_err)?;
        params = params.with_contrast(slot + 2, ContrastChannel { image, kind });
    }
    params.n_steps = n_steps;
    params.topology = topology
        .parse::<Topology>()
        .map_err(|e| to_py_err(Error::from(e)))?;
    params.atlas_file = atlas_file;
    params.topology_lut_dir = topology_lut_dir;
    params.adjust_intensity_priors = adjust_intensity_priors;
    params.compute_posterior = compute_posterior;
    params.diffuse_probabilities = diffuse_probabilities;
    // engine outputs are always rewritten
    params.save = save_options(save_data, true, output_dir, file_name, file_extension);
    params.log_file = log_file;

    let runtime = PyEngineRuntime::new(engine);
    let bundle = mgdm_segmentation(&runtime, &settings()?, params)
        .context("mgdm_segmentation failed")
        .map_err(to_py_err)?;
    bundle_to_dict(py, bundle)
}

/// CRUISE cortical reconstruction from an initial WM mask and tissue
/// probabilities.
///
/// Arguments:
///
/// - ``engine`` – module exposing ``initVM``, ``JArray`` and the engine classes
/// - ``init_image``, ``wm_image``, ``gm_image``, ``csf_image`` – file path or ``PyVolume``
/// - ``vd_image`` (optional) – vessels and dura probability
/// - ``data_weight`` (default: 0.4), ``regularization_weight`` (default: 0.1)
/// - ``max_iterations`` (default: 500)
/// - ``save_data`` / ``overwrite`` – existing outputs are reused unless ``overwrite``
///
/// Returns:
///     dict: ``cortex``, ``gwb``, ``cgb``, ``avg``, ``thickness``, ``pwm``, ``pgm``, ``pcsf``
#[pyfunction(name = "cruise_cortex_extraction")]
#[pyo3(signature = (
    engine,
    init_image,
    wm_image,
    gm_image,
    csf_image,
    vd_image = None,
    data_weight = 0.4,
    regularization_weight = 0.1,
    max_iterations = 500usize,
    normalize_probabilities = false,
    correct_wm_pv = true,
    wm_dropoff_dist = 1.0,
    topology = "wcs",
    topology_lut_dir = None,
    save_data = false,
    overwrite = false,
    output_dir = None,
    file_name = None,
    file_extension = None,
    log_file = None
))]
#[allow(clippy::too_many_arguments)]
pub fn cruise_cortex_extraction_py(
    py: Python<'_>,
    engine: Py<PyAny>,
    init_image: &Bound<'_, PyAny>,
    wm_image: &Bound<'_, PyAny>,
    gm_image: &Bound<'_, PyAny>,
    csf_image: &Bound<'_, PyAny>,
    vd_image: Option<&Bound<'_, PyAny>>,
    data_weight: f64,
    regularization_weight: f64,
    max_iterations: usize,
    normalize_probabilities: bool,
    correct_wm_pv: bool,
    wm_dropoff_dist: f64,
    topology: &str,
    topology_lut_dir: Option<PathBuf>,
    save_data: bool,
    overwrite: bool,
    output_dir: Option<PathBuf>,
    file_name: Option<String>,
    file_extension: Option<String>,
    log_file: Option<PathBuf>,
) -> PyResult<Py<PyDict>> {
    let source = |obj: &Bound<'_, PyAny>| volume_source(obj).map_err(to_py_err);
    let mut params = CruiseParams::new(
        source(init_image)?,
        source(wm_image)?,
        source(gm_image)?,
        source(csf_image)?,
    );
    params.vd_image = vd_image.map(source).transpose()?;
    params.data_weight = data_weight;
    params.regularization_weight = regularization_weight;
    params.max_iterations = max_iterations;
    params.normalize_probabilities = normalize_probabilities;
    params.correct_wm_pv = correct_wm_pv;
    params.wm_dropoff_dist = wm_dropoff_dist;
    params.topology = topology
        .parse::<Topology>()
        .map_err(|e| to_py_err(Error::from(e)))?;
    params.topology_lut_dir = topology_lut_dir;
    params.save = save_options(save_data, overwrite, output_dir, file_name, file_extension);
    params.log_file = log_file;

    let runtime = PyEngineRuntime::new(engine);
    let bundle = cruise_cortex_extraction(&runtime, &settings()?, params)
        .context("cruise_cortex_extraction failed")
        .map_err(to_py_err)?;
    bundle_to_dict(py, bundle)
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(resolve_orientation, m)?)?;
    m.add_function(wrap_pyfunction!(intensity_priors, m)?)?;
    m.add_function(wrap_pyfunction!(time_log_py, m)?)?;
    m.add_function(wrap_pyfunction!(mgdm_segmentation_py, m)?)?;
    m.add_function(wrap_pyfunction!(cruise_cortex_extraction_py, m)?)?;

    m.add_class::<PyVolume>()?;
    Ok(())
}
