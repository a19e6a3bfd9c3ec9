//! Seam to the external deformable-model engine.
//!
//! The engine is a black box with a configure / `execute` / retrieve
//! lifecycle. Instances are neither thread-safe nor reentrant: orchestrators
//! ask the runtime for a fresh one on every call. Every call may block, and
//! `execute` may fail with an opaque engine error.

pub mod marshal;

use crate::config::VmMemory;
use crate::error::{EngineError, ValidationError};
use crate::orientation::OrientationCode;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Topology constraint applied while the level sets evolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Well-composed surfaces, the strongest constraint.
    #[default]
    Wcs,
    Wco,
    SixEighteen,
    SixTwentySix,
    EighteenSix,
    TwentySixSix,
    None,
}

impl Topology {
    pub fn as_str(self) -> &'static str {
        match self {
            Topology::Wcs => "wcs",
            Topology::Wco => "wco",
            Topology::SixEighteen => "6/18",
            Topology::SixTwentySix => "6/26",
            Topology::EighteenSix => "18/6",
            Topology::TwentySixSix => "26/6",
            Topology::None => "no",
        }
    }
}

impl FromStr for Topology {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wcs" => Ok(Topology::Wcs),
            "wco" => Ok(Topology::Wco),
            "6/18" => Ok(Topology::SixEighteen),
            "6/26" => Ok(Topology::SixTwentySix),
            "18/6" => Ok(Topology::EighteenSix),
            "26/6" => Ok(Topology::TwentySixSix),
            "no" => Ok(Topology::None),
            other => Err(ValidationError::UnknownTopology(other.to_string())),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide engine runtime (the virtual machine hosting the engine).
pub trait EngineRuntime {
    /// Starts the runtime. A second start must fail with
    /// [`EngineError::AlreadyInitialized`].
    fn init_vm(&self, memory: &VmMemory) -> Result<(), EngineError>;

    fn create_mgdm(&self) -> Result<Box<dyn MgdmEngine>, EngineError>;

    fn create_cruise(&self) -> Result<Box<dyn CruiseEngine>, EngineError>;
}

/// Starts the runtime if it is not running yet. "Already initialized" is the
/// expected outcome of every call after the first and is discarded.
pub fn start_runtime(runtime: &dyn EngineRuntime, memory: &VmMemory) -> Result<(), EngineError> {
    match runtime.init_vm(memory) {
        Ok(()) => {
            tracing::debug!("engine runtime started (heap {} / {})", memory.initial, memory.max);
            Ok(())
        }
        Err(EngineError::AlreadyInitialized) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Multiple-object geometric deformable model (whole-brain segmentation).
pub trait MgdmEngine {
    fn set_atlas_file(&mut self, path: &Path);
    fn set_topology_lut_directory(&mut self, path: &Path);
    fn set_output_images(&mut self, kind: &str);
    fn set_adjust_intensity_priors(&mut self, flag: bool);
    fn set_compute_posterior(&mut self, flag: bool);
    fn set_diffuse_probabilities(&mut self, flag: bool);
    fn set_steps(&mut self, steps: usize);
    fn set_topology(&mut self, topology: Topology);
    fn set_dimensions(&mut self, dims: [usize; 3]);
    fn set_resolutions(&mut self, res: [f64; 3]);
    fn set_orientations(&mut self, orientation: OrientationCode);
    /// `index` is the 1-based channel slot.
    fn set_contrast_image(&mut self, index: usize, image: Vec<f64>);
    fn set_contrast_type(&mut self, index: usize, kind: &str);

    fn execute(&mut self) -> Result<(), EngineError>;

    fn segmented_brain_image(&self) -> Vec<f64>;
    fn posterior_maximum_labels(&self) -> Vec<f64>;
    fn posterior_maximum_memberships(&self) -> Vec<f64>;
    fn levelset_boundary_image(&self) -> Vec<f64>;
}

/// CRUISE cortical reconstruction.
pub trait CruiseEngine {
    fn set_data_weight(&mut self, weight: f64);
    fn set_regularization_weight(&mut self, weight: f64);
    fn set_max_iterations(&mut self, iterations: usize);
    fn set_normalize_probabilities(&mut self, flag: bool);
    fn set_correct_wm_gm_partial_voluming(&mut self, flag: bool);
    fn set_wm_dropoff_distance(&mut self, distance: f64);
    fn set_topology(&mut self, topology: Topology);
    fn set_topology_lut_directory(&mut self, path: &Path);
    fn set_dimensions(&mut self, dims: [usize; 3]);
    fn set_resolutions(&mut self, res: [f64; 3]);
    fn import_initial_wm_segmentation(&mut self, mask: Vec<i32>);
    fn set_filled_wm_probability(&mut self, image: Vec<f64>);
    fn set_gm_probability(&mut self, image: Vec<f64>);
    fn set_csf_and_bg_probability(&mut self, image: Vec<f64>);
    fn set_veins_and_dura_probability(&mut self, image: Vec<f64>);

    fn execute(&mut self) -> Result<(), EngineError>;

    fn cortex_mask(&self) -> Vec<f64>;
    fn wm_gm_levelset(&self) -> Vec<f64>;
    fn gm_csf_levelset(&self) -> Vec<f64>;
    fn central_levelset(&self) -> Vec<f64>;
    fn cortical_thickness(&self) -> Vec<f64>;
    fn cerebral_wm_probability(&self) -> Vec<f64>;
    fn cortical_gm_probability(&self) -> Vec<f64>;
    fn sulcal_csf_probability(&self) -> Vec<f64>;
}
