//! Default locations for atlases, topology lookup tables and the time log.
//!
//! Values come from [`Settings::default`] and can be overridden with a TOML
//! file, either passed explicitly or named by the `NEUROSEG_CONFIG`
//! environment variable.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

pub const CONFIG_ENV_VAR: &str = "NEUROSEG_CONFIG";
pub const DEFAULT_LOG_FILE: &str = "timelog.json";

/// Heap sizes handed to the engine runtime on first start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmMemory {
    pub initial: String,
    pub max: String,
}

impl Default for VmMemory {
    fn default() -> Self {
        Self {
            initial: "6000m".to_string(),
            max: "6000m".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the plain-text MGDM atlases.
    pub atlas_dir: PathBuf,
    /// Atlas used when a call does not name one.
    pub default_atlas: PathBuf,
    /// Directory with the engine's topology lookup tables.
    pub topology_lut_dir: PathBuf,
    pub log_file: PathBuf,
    pub vm_memory: VmMemory,
}

impl Default for Settings {
    fn default() -> Self {
        let atlas_dir = PathBuf::from("atlases").join("brain-segmentation-prior3.0");
        Self {
            default_atlas: atlas_dir.join("brain-atlas-3.0.3.txt"),
            atlas_dir,
            topology_lut_dir: PathBuf::from("lut"),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            vm_memory: VmMemory::default(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reads the file named by `NEUROSEG_CONFIG`, or falls back to defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Topology LUT directory with a guaranteed trailing path separator,
    /// which the engine concatenates file names onto.
    pub fn check_topology_lut_dir(&self, lut_dir: Option<&Path>) -> PathBuf {
        let dir = lut_dir.unwrap_or(&self.topology_lut_dir);
        let mut text = dir.to_string_lossy().into_owned();
        if !text.ends_with(MAIN_SEPARATOR) {
            text.push(MAIN_SEPARATOR);
        }
        PathBuf::from(text)
    }

    /// Resolves which atlas file to use.
    ///
    /// `None` selects the default atlas. A relative name that does not exist
    /// as given is looked up inside `atlas_dir`.
    pub fn check_atlas_file(&self, atlas: Option<&Path>) -> PathBuf {
        match atlas {
            None => self.default_atlas.clone(),
            Some(path) if path.exists() || path.is_absolute() => path.to_path_buf(),
            Some(path) => {
                let candidate = self.atlas_dir.join(path);
                if candidate.exists() {
                    candidate
                } else {
                    path.to_path_buf()
                }
            }
        }
    }
}
