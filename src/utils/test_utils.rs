//! Recording engine doubles and volume helpers for unit tests.

use crate::config::VmMemory;
use crate::engine::{CruiseEngine, EngineRuntime, MgdmEngine, Topology};
use crate::error::EngineError;
use crate::io::volume::Volume;
use crate::orientation::OrientationCode;
use nalgebra::Matrix4;
use ndarray::{ArrayD, IxDyn};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Runtime double: remembers whether it was started and hands out engines
/// that append every configuration call to a shared log.
#[derive(Default)]
pub struct FakeRuntime {
    pub init_failure: Option<String>,
    pub execute_failure: Option<String>,
    pub calls: CallLog,
    started: Cell<bool>,
    init_attempts: Cell<usize>,
    engines: Cell<usize>,
}

impl FakeRuntime {
    pub fn failing_execute(message: &str) -> Self {
        Self {
            execute_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_init(message: &str) -> Self {
        Self {
            init_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn init_attempts(&self) -> usize {
        self.init_attempts.get()
    }

    pub fn engines_created(&self) -> usize {
        self.engines.get()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.starts_with(prefix))
    }
}

impl EngineRuntime for FakeRuntime {
    fn init_vm(&self, _memory: &VmMemory) -> Result<(), EngineError> {
        self.init_attempts.set(self.init_attempts.get() + 1);
        if let Some(msg) = &self.init_failure {
            return Err(EngineError::Runtime(msg.clone()));
        }
        if self.started.replace(true) {
            return Err(EngineError::AlreadyInitialized);
        }
        Ok(())
    }

    fn create_mgdm(&self) -> Result<Box<dyn MgdmEngine>, EngineError> {
        self.engines.set(self.engines.get() + 1);
        Ok(Box::new(FakeMgdm {
            calls: self.calls.clone(),
            execute_failure: self.execute_failure.clone(),
            ..FakeMgdm::default()
        }))
    }

    fn create_cruise(&self) -> Result<Box<dyn CruiseEngine>, EngineError> {
        self.engines.set(self.engines.get() + 1);
        Ok(Box::new(FakeCruise {
            calls: self.calls.clone(),
            execute_failure: self.execute_failure.clone(),
            ..FakeCruise::default()
        }))
    }
}

/// Segmentation echoes channel 1, labels count voxels, memberships are 0.5,
/// distances are channel 1 doubled.
#[derive(Default)]
pub struct FakeMgdm {
    calls: CallLog,
    execute_failure: Option<String>,
    dims: [usize; 3],
    channel1: Vec<f64>,
}

impl FakeMgdm {
    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn voxels(&self) -> usize {
        self.dims.iter().product()
    }
}

impl MgdmEngine for FakeMgdm {
    fn set_atlas_file(&mut self, path: &Path) {
        self.log(format!("mgdm.atlas {}", path.display()));
    }
    fn set_topology_lut_directory(&mut self, path: &Path) {
        self.log(format!("mgdm.lut {}", path.display()));
    }
    fn set_output_images(&mut self, kind: &str) {
        self.log(format!("mgdm.output_images {}", kind));
    }
    fn set_adjust_intensity_priors(&mut self, flag: bool) {
        self.log(format!("mgdm.adjust_priors {}", flag));
    }
    fn set_compute_posterior(&mut self, flag: bool) {
        self.log(format!("mgdm.posterior {}", flag));
    }
    fn set_diffuse_probabilities(&mut self, flag: bool) {
        self.log(format!("mgdm.diffuse {}", flag));
    }
    fn set_steps(&mut self, steps: usize) {
        self.log(format!("mgdm.steps {}", steps));
    }
    fn set_topology(&mut self, topology: Topology) {
        self.log(format!("mgdm.topology {}", topology));
    }
    fn set_dimensions(&mut self, dims: [usize; 3]) {
        self.dims = dims;
        self.log(format!("mgdm.dimensions {:?}", dims));
    }
    fn set_resolutions(&mut self, res: [f64; 3]) {
        self.log(format!("mgdm.resolutions {:?}", res));
    }
    fn set_orientations(&mut self, orientation: OrientationCode) {
        self.log(format!("mgdm.orientation {:?}", orientation));
    }
    fn set_contrast_image(&mut self, index: usize, image: Vec<f64>) {
        self.log(format!("mgdm.contrast_image{} {}", index, image.len()));
        if index == 1 {
            self.channel1 = image;
        }
    }
    fn set_contrast_type(&mut self, index: usize, kind: &str) {
        self.log(format!("mgdm.contrast_type{} {}", index, kind));
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        self.log("mgdm.execute".to_string());
        if let Some(msg) = &self.execute_failure {
            return Err(EngineError::Execution(msg.clone()));
        }
        Ok(())
    }

    fn segmented_brain_image(&self) -> Vec<f64> {
        self.channel1.clone()
    }
    fn posterior_maximum_labels(&self) -> Vec<f64> {
        (0..self.voxels()).map(|i| i as f64).collect()
    }
    fn posterior_maximum_memberships(&self) -> Vec<f64> {
        vec![0.5; self.voxels()]
    }
    fn levelset_boundary_image(&self) -> Vec<f64> {
        self.channel1.iter().map(|v| v * 2.0).collect()
    }
}

/// Cortex echoes the init mask plus one, probabilities echo their inputs,
/// level sets and thickness are constants.
#[derive(Default)]
pub struct FakeCruise {
    calls: CallLog,
    execute_failure: Option<String>,
    dims: [usize; 3],
    init: Vec<i32>,
    wm: Vec<f64>,
    gm: Vec<f64>,
    csf: Vec<f64>,
}

impl FakeCruise {
    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn constant(&self, value: f64) -> Vec<f64> {
        vec![value; self.dims.iter().product()]
    }
}

impl CruiseEngine for FakeCruise {
    fn set_data_weight(&mut self, weight: f64) {
        self.log(format!("cruise.data_weight {}", weight));
    }
    fn set_regularization_weight(&mut self, weight: f64) {
        self.log(format!("cruise.regularization_weight {}", weight));
    }
    fn set_max_iterations(&mut self, iterations: usize) {
        self.log(format!("cruise.max_iterations {}", iterations));
    }
    fn set_normalize_probabilities(&mut self, flag: bool) {
        self.log(format!("cruise.normalize {}", flag));
    }
    fn set_correct_wm_gm_partial_voluming(&mut self, flag: bool) {
        self.log(format!("cruise.correct_wm_pv {}", flag));
    }
    fn set_wm_dropoff_distance(&mut self, distance: f64) {
        self.log(format!("cruise.wm_dropoff {}", distance));
    }
    fn set_topology(&mut self, topology: Topology) {
        self.log(format!("cruise.topology {}", topology));
    }
    fn set_topology_lut_directory(&mut self, path: &Path) {
        self.log(format!("cruise.lut {}", path.display()));
    }
    fn set_dimensions(&mut self, dims: [usize; 3]) {
        self.dims = dims;
        self.log(format!("cruise.dimensions {:?}", dims));
    }
    fn set_resolutions(&mut self, res: [f64; 3]) {
        self.log(format!("cruise.resolutions {:?}", res));
    }
    fn import_initial_wm_segmentation(&mut self, mask: Vec<i32>) {
        self.log(format!("cruise.init {}", mask.len()));
        self.init = mask;
    }
    fn set_filled_wm_probability(&mut self, image: Vec<f64>) {
        self.log(format!("cruise.wm {}", image.len()));
        self.wm = image;
    }
    fn set_gm_probability(&mut self, image: Vec<f64>) {
        self.log(format!("cruise.gm {}", image.len()));
        self.gm = image;
    }
    fn set_csf_and_bg_probability(&mut self, image: Vec<f64>) {
        self.log(format!("cruise.csf {}", image.len()));
        self.csf = image;
    }
    fn set_veins_and_dura_probability(&mut self, image: Vec<f64>) {
        self.log(format!("cruise.vd {}", image.len()));
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        self.log("cruise.execute".to_string());
        match &self.execute_failure {
            Some(msg) => Err(EngineError::Execution(msg.clone())),
            None => Ok(()),
        }
    }

    fn cortex_mask(&self) -> Vec<f64> {
        self.init.iter().map(|&v| v as f64 + 1.0).collect()
    }
    fn wm_gm_levelset(&self) -> Vec<f64> {
        self.constant(-1.5)
    }
    fn gm_csf_levelset(&self) -> Vec<f64> {
        self.constant(1.5)
    }
    fn central_levelset(&self) -> Vec<f64> {
        self.constant(0.0)
    }
    fn cortical_thickness(&self) -> Vec<f64> {
        self.constant(2.5)
    }
    fn cerebral_wm_probability(&self) -> Vec<f64> {
        self.wm.clone()
    }
    fn cortical_gm_probability(&self) -> Vec<f64> {
        self.gm.clone()
    }
    fn sulcal_csf_probability(&self) -> Vec<f64> {
        self.csf.clone()
    }
}

/// Voxel value encodes its own index so misplaced voxels are detectable.
pub fn index_volume(shape: [usize; 3], affine: Matrix4<f64>) -> Volume {
    let data = ArrayD::from_shape_fn(IxDyn(&shape), |i| (i[0] + 100 * i[1] + 10_000 * i[2]) as f64);
    Volume::new(data, affine)
}

pub fn scaled_affine(zooms: [f64; 3]) -> Matrix4<f64> {
    let mut affine = Matrix4::identity();
    affine[(0, 0)] = -zooms[0];
    affine[(1, 1)] = zooms[1];
    affine[(2, 2)] = zooms[2];
    affine[(0, 3)] = 90.0;
    affine[(1, 3)] = -126.0;
    affine[(2, 3)] = -72.0;
    affine
}

pub fn write_atlas(dir: &Path, priors: &[&str]) -> std::path::PathBuf {
    let mut text = String::from("Structures:\t3\tlabels\nBg\t1\nWm\t2\nGm\t3\n");
    for prior in priors {
        text.push_str(&format!("Intensity Prior:\t{}\n", prior));
    }
    let path = dir.join("atlas.txt");
    std::fs::write(&path, text).expect("failed to write atlas");
    path
}
