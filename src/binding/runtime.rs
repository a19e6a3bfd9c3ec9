//! Engine runtime backed by a Python module exposing the JCC-wrapped
//! engines (`initVM`, `JArray` and the engine classes).

use crate::config::VmMemory;
use crate::engine::{CruiseEngine, EngineRuntime, MgdmEngine, Topology};
use crate::error::EngineError;
use crate::orientation::{ApFlip, IsFlip, LrFlip, OrientationCode, SliceOrder};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyTuple};
use std::path::Path;

const MGDM_CLASS: &str = "BrainMgdmMultiSegmentation2";
const CRUISE_CLASS: &str = "CortexOptimCRUISE";

pub struct PyEngineRuntime {
    module: Py<PyAny>,
}

impl PyEngineRuntime {
    pub fn new(module: Py<PyAny>) -> Self {
        Self { module }
    }

    fn instantiate(&self, class: &str) -> Result<PyEngine, EngineError> {
        Python::with_gil(|py| {
            let engine = self
                .module
                .bind(py)
                .call_method0(class)
                .map_err(|e| EngineError::Runtime(format!("cannot create {}: {}", class, e)))?;
            Ok(PyEngine {
                module: self.module.clone_ref(py),
                engine: engine.unbind(),
                pending: None,
            })
        })
    }
}

impl EngineRuntime for PyEngineRuntime {
    fn init_vm(&self, memory: &VmMemory) -> Result<(), EngineError> {
        Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            kwargs
                .set_item("initialheap", &memory.initial)
                .and_then(|_| kwargs.set_item("maxheap", &memory.max))
                .map_err(|e| EngineError::Runtime(e.to_string()))?;
            match self.module.bind(py).call_method("initVM", (), Some(&kwargs)) {
                Ok(_) => Ok(()),
                // JCC refuses a second VM with ValueError
                Err(e) if e.is_instance_of::<PyValueError>(py) => Err(EngineError::AlreadyInitialized),
                Err(e) => Err(EngineError::Runtime(e.to_string())),
            }
        })
    }

    fn create_mgdm(&self) -> Result<Box<dyn MgdmEngine>, EngineError> {
        Ok(Box::new(PyMgdm(self.instantiate(MGDM_CLASS)?)))
    }

    fn create_cruise(&self) -> Result<Box<dyn CruiseEngine>, EngineError> {
        Ok(Box::new(PyCruise(self.instantiate(CRUISE_CLASS)?)))
    }
}

/// One engine instance. Setter failures are held back and reported by
/// `execute`, since the engine traits have infallible setters.
struct PyEngine {
    module: Py<PyAny>,
    engine: Py<PyAny>,
    pending: Option<EngineError>,
}

impl PyEngine {
    fn call<F>(&mut self, method: &str, args: F)
    where
        F: for<'py> FnOnce(Python<'py>, &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyTuple>>,
    {
        if self.pending.is_some() {
            return;
        }
        let result = Python::with_gil(|py| -> PyResult<()> {
            let module = self.module.bind(py);
            let args = args(py, module)?;
            self.engine.bind(py).call_method1(method, args)?;
            Ok(())
        });
        if let Err(e) = result {
            self.pending = Some(EngineError::Execution(format!("{}: {}", method, e)));
        }
    }

    fn constant<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyAny>> {
        self.engine.bind(py).getattr(name)
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        Python::with_gil(|py| {
            self.engine
                .bind(py)
                .call_method0("execute")
                .map(|_| ())
                .map_err(|e| EngineError::Execution(e.to_string()))
        })
    }

    /// An unreadable result comes back empty and is rejected when reshaped.
    fn fetch(&self, method: &str) -> Vec<f64> {
        Python::with_gil(|py| {
            self.engine
                .bind(py)
                .call_method0(method)
                .and_then(|values| values.extract::<Vec<f64>>())
        })
        .unwrap_or_else(|e| {
            tracing::error!("{} failed: {}", method, e);
            Vec::new()
        })
    }
}

/// Wraps `values` in `JArray(kind)` when the module provides it.
fn java_array<'py, T>(
    py: Python<'py>,
    module: &Bound<'py, PyAny>,
    kind: &str,
    values: Vec<T>,
) -> PyResult<Bound<'py, PyAny>>
where
    T: IntoPyObject<'py>,
{
    let list = PyList::new(py, values)?;
    if module.hasattr("JArray")? {
        module.call_method1("JArray", (kind,))?.call1((list,))
    } else {
        Ok(list.into_any())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

struct PyMgdm(PyEngine);

impl MgdmEngine for PyMgdm {
    fn set_atlas_file(&mut self, path: &Path) {
        let path = path_arg(path);
        self.0.call("setAtlasFile", |py, _| (path,).into_pyobject(py));
    }
    fn set_topology_lut_directory(&mut self, path: &Path) {
        let path = path_arg(path);
        self.0.call("setTopologyLUTdirectory", |py, _| (path,).into_pyobject(py));
    }
    fn set_output_images(&mut self, kind: &str) {
        let kind = kind.to_string();
        self.0.call("setOutputImages", |py, _| (kind,).into_pyobject(py));
    }
    fn set_adjust_intensity_priors(&mut self, flag: bool) {
        self.0.call("setAdjustIntensityPriors", |py, _| (flag,).into_pyobject(py));
    }
    fn set_compute_posterior(&mut self, flag: bool) {
        self.0.call("setComputePosterior", |py, _| (flag,).into_pyobject(py));
    }
    fn set_diffuse_probabilities(&mut self, flag: bool) {
        self.0.call("setDiffuseProbabilities", |py, _| (flag,).into_pyobject(py));
    }
    fn set_steps(&mut self, steps: usize) {
        self.0.call("setSteps", |py, _| (steps,).into_pyobject(py));
    }
    fn set_topology(&mut self, topology: Topology) {
        self.0.call("setTopology", |py, _| (topology.as_str(),).into_pyobject(py));
    }
    fn set_dimensions(&mut self, dims: [usize; 3]) {
        self.0.call("setDimensions", |py, _| (dims[0], dims[1], dims[2]).into_pyobject(py));
    }
    fn set_resolutions(&mut self, res: [f64; 3]) {
        self.0.call("setResolutions", |py, _| (res[0], res[1], res[2]).into_pyobject(py));
    }
    fn set_orientations(&mut self, orientation: OrientationCode) {
        let names = orientation_names(orientation);
        let constants = Python::with_gil(|py| -> PyResult<Vec<PyObject>> {
            names
                .iter()
                .map(|name| self.0.constant(py, name).map(Bound::unbind))
                .collect()
        });
        match constants {
            Ok(constants) => self.0.call("setOrientations", move |py, _| {
                PyTuple::new(py, constants.iter().map(|c| c.bind(py)))
            }),
            Err(e) => {
                self.0.pending.get_or_insert(EngineError::Execution(format!(
                    "orientation constants unavailable: {}",
                    e
                )));
            }
        }
    }
    fn set_contrast_image(&mut self, index: usize, image: Vec<f64>) {
        self.0.call(&format!("setContrastImage{}", index), |py, module| {
            (java_array(py, module, "float", image)?,).into_pyobject(py)
        });
    }
    fn set_contrast_type(&mut self, index: usize, kind: &str) {
        let kind = kind.to_string();
        self.0.call(&format!("setContrastType{}", index), |py, _| (kind,).into_pyobject(py));
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        self.0.execute()
    }

    fn segmented_brain_image(&self) -> Vec<f64> {
        self.0.fetch("getSegmentedBrainImage")
    }
    fn posterior_maximum_labels(&self) -> Vec<f64> {
        self.0.fetch("getPosteriorMaximumLabels4D")
    }
    fn posterior_maximum_memberships(&self) -> Vec<f64> {
        self.0.fetch("getPosteriorMaximumMemberships4D")
    }
    fn levelset_boundary_image(&self) -> Vec<f64> {
        self.0.fetch("getLevelsetBoundaryImage")
    }
}

struct PyCruise(PyEngine);

impl CruiseEngine for PyCruise {
    fn set_data_weight(&mut self, weight: f64) {
        self.0.call("setDataWeight", |py, _| (weight,).into_pyobject(py));
    }
    fn set_regularization_weight(&mut self, weight: f64) {
        self.0.call("setRegularizationWeight", |py, _| (weight,).into_pyobject(py));
    }
    fn set_max_iterations(&mut self, iterations: usize) {
        self.0.call("setMaxIterations", |py, _| (iterations,).into_pyobject(py));
    }
    fn set_normalize_probabilities(&mut self, flag: bool) {
        self.0.call("setNormalizeProbabilities", |py, _| (flag,).into_pyobject(py));
    }
    fn set_correct_wm_gm_partial_voluming(&mut self, flag: bool) {
        self.0.call("setCorrectForWMGMpartialVoluming", |py, _| (flag,).into_pyobject(py));
    }
    fn set_wm_dropoff_distance(&mut self, distance: f64) {
        self.0.call("setWMdropoffDistance", |py, _| (distance,).into_pyobject(py));
    }
    fn set_topology(&mut self, topology: Topology) {
        self.0.call("setTopology", |py, _| (topology.as_str(),).into_pyobject(py));
    }
    fn set_topology_lut_directory(&mut self, path: &Path) {
        let path = path_arg(path);
        self.0.call("setTopologyLUTdirectory", |py, _| (path,).into_pyobject(py));
    }
    fn set_dimensions(&mut self, dims: [usize; 3]) {
        self.0.call("setDimensions", |py, _| (dims[0], dims[1], dims[2]).into_pyobject(py));
    }
    fn set_resolutions(&mut self, res: [f64; 3]) {
        self.0.call("setResolutions", |py, _| (res[0], res[1], res[2]).into_pyobject(py));
    }
    fn import_initial_wm_segmentation(&mut self, mask: Vec<i32>) {
        self.0.call("importInitialWMSegmentationImage", |py, module| {
            (java_array(py, module, "int", mask)?,).into_pyobject(py)
        });
    }
    fn set_filled_wm_probability(&mut self, image: Vec<f64>) {
        self.0.call("setFilledWMProbabilityImage", |py, module| {
            (java_array(py, module, "float", image)?,).into_pyobject(py)
        });
    }
    fn set_gm_probability(&mut self, image: Vec<f64>) {
        self.0.call("setGMProbabilityImage", |py, module| {
            (java_array(py, module, "float", image)?,).into_pyobject(py)
        });
    }
    fn set_csf_and_bg_probability(&mut self, image: Vec<f64>) {
        self.0.call("setCSFandBGProbabilityImage", |py, module| {
            (java_array(py, module, "float", image)?,).into_pyobject(py)
        });
    }
    fn set_veins_and_dura_probability(&mut self, image: Vec<f64>) {
        self.0.call("setVeinsAndDuraProbabilityImage", |py, module| {
            (java_array(py, module, "float", image)?,).into_pyobject(py)
        });
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        self.0.execute()
    }

    fn cortex_mask(&self) -> Vec<f64> {
        self.0.fetch("getCortexMask")
    }
    fn wm_gm_levelset(&self) -> Vec<f64> {
        self.0.fetch("getWMGMLevelset")
    }
    fn gm_csf_levelset(&self) -> Vec<f64> {
        self.0.fetch("getGMCSFLevelset")
    }
    fn central_levelset(&self) -> Vec<f64> {
        self.0.fetch("getCentralLevelset")
    }
    fn cortical_thickness(&self) -> Vec<f64> {
        self.0.fetch("getCorticalThickness")
    }
    fn cerebral_wm_probability(&self) -> Vec<f64> {
        self.0.fetch("getCerebralWMprobability")
    }
    fn cortical_gm_probability(&self) -> Vec<f64> {
        self.0.fetch("getCorticalGMprobability")
    }
    fn sulcal_csf_probability(&self) -> Vec<f64> {
        self.0.fetch("getSulcalCSFprobability")
    }
}

/// Engine constant names, in `setOrientations` argument order.
pub fn orientation_names(code: OrientationCode) -> [&'static str; 4] {
    let slice = match code.slice_order {
        SliceOrder::Axial => "AXIAL",
        SliceOrder::Coronal => "CORONAL",
        SliceOrder::Sagittal => "SAGITTAL",
    };
    let lr = match code.lr {
        LrFlip::R2L => "R2L",
        LrFlip::L2R => "L2R",
    };
    let ap = match code.ap {
        ApFlip::P2A => "P2A",
        ApFlip::A2P => "A2P",
    };
    let is = match code.is {
        IsFlip::S2I => "S2I",
        IsFlip::I2S => "I2S",
    };
    [slice, lr, ap, is]
}
