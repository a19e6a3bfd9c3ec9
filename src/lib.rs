//! Orchestration around the MGDM whole-brain segmentation and CRUISE cortical
//! reconstruction engines: volume IO, timing logs, orientation handling,
//! atlas prior catalogs and the two pipeline entry points.

pub mod atlas;
pub mod brain;
pub mod config;
pub mod cortex;
pub mod engine;
pub mod error;
pub mod io;
pub mod orientation;
mod utils;

#[cfg(feature = "python")]
mod binding;

pub use brain::{mgdm_segmentation, ContrastChannel, MgdmParams};
pub use config::Settings;
pub use cortex::{cruise_cortex_extraction, CruiseParams};
pub use engine::{EngineRuntime, Topology};
pub use error::{Error, Result};
pub use io::output::{OutputItem, ResultBundle, SaveOptions};
pub use io::volume::{DataType, Volume};
pub use io::{load_volume, save_volume, VolumeSource};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn neurosegrs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    binding::register(m)
}
