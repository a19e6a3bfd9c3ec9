pub mod nifti;
pub mod output;
pub mod time_log;
pub mod volume;

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use time_log::{now_seconds, time_log};
use volume::{DataType, Volume};

/// Either a file to read or a volume already in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSource {
    Path(PathBuf),
    Memory(Volume),
}

impl VolumeSource {
    /// The backing file, if any. Used to derive output names.
    pub fn path(&self) -> Option<&Path> {
        match self {
            VolumeSource::Path(p) => Some(p.as_path()),
            VolumeSource::Memory(_) => None,
        }
    }
}

impl From<Volume> for VolumeSource {
    fn from(v: Volume) -> Self {
        VolumeSource::Memory(v)
    }
}

impl From<PathBuf> for VolumeSource {
    fn from(p: PathBuf) -> Self {
        VolumeSource::Path(p)
    }
}

impl From<&Path> for VolumeSource {
    fn from(p: &Path) -> Self {
        VolumeSource::Path(p.to_path_buf())
    }
}

impl From<&str> for VolumeSource {
    fn from(p: &str) -> Self {
        VolumeSource::Path(PathBuf::from(p))
    }
}

/// Loads a volume, reading files fully into memory before decoding so that
/// truncated or corrupt files fail here rather than on first data access.
///
/// File reads add one `read` entry under `task` to the time log; in-memory
/// volumes pass through untouched and unlogged.
pub fn load_volume(source: VolumeSource, task: &str, log_file: &Path) -> Result<Volume> {
    match source {
        VolumeSource::Memory(volume) => Ok(volume),
        VolumeSource::Path(path) => {
            let start = now_seconds();
            let bytes = std::fs::read(&path).map_err(|source| Error::Read {
                path: path.clone(),
                source,
            })?;
            let volume = nifti::decode(&bytes)?;
            let end = now_seconds();
            time_log(log_file, task, "read", Some(&path), start, end)?;
            Ok(volume)
        }
    }
}

/// Writes `volume` to `path`, gzip-compressed when the name ends in `.gz`.
///
/// An existing file with `overwrite == false`, or a volume that cannot be
/// encoded, is reported and skipped rather than returned as an error so that
/// pipeline re-runs stay idempotent. A `write` time-log entry is recorded
/// either way.
pub fn save_volume(
    path: &Path,
    volume: &mut Volume,
    dtype: Option<DataType>,
    overwrite: bool,
    task: &str,
    log_file: &Path,
) -> Result<()> {
    let start = now_seconds();
    if let Some(dtype) = dtype {
        volume.set_data_dtype(dtype);
    }

    if path.is_file() && !overwrite {
        tracing::warn!(
            "{} exists and overwrite was set to false, file not saved",
            path.display()
        );
    } else {
        match encode_for(path, volume) {
            Ok(bytes) => {
                std::fs::write(path, bytes)?;
                tracing::info!("saving {}", path.display());
            }
            Err(e) => tracing::warn!("volume for {} could not be encoded: {}", path.display(), e),
        }
    }

    let end = now_seconds();
    time_log(log_file, task, "write", Some(path), start, end)
}

fn encode_for(path: &Path, volume: &Volume) -> std::result::Result<Vec<u8>, crate::error::NiftiError> {
    let raw = nifti::encode(volume)?;
    let gz = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gz {
        nifti::gzip(&raw)
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix4;
    use ndarray::{ArrayD, IxDyn};
    use time_log::read_entries;

    fn ramp() -> Volume {
        let data = ArrayD::from_shape_fn(IxDyn(&[4, 3, 2]), |i| (i[0] * 6 + i[1] * 2 + i[2]) as f64);
        Volume::new(data, Matrix4::identity())
    }

    #[test]
    fn save_then_load_through_files() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let target = tmp.path().join("ramp.nii.gz");

        let mut vol = ramp();
        save_volume(&target, &mut vol, Some(DataType::Float32), true, "save_test", &log).unwrap();
        let loaded = load_volume(VolumeSource::from(target.as_path()), "load_test", &log).unwrap();
        assert_eq!(loaded.data, vol.data);

        let writes = read_entries(&log, "save_test", "write").unwrap();
        let reads = read_entries(&log, "load_test", "read").unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
        let on_disk = std::fs::metadata(&target).unwrap().len();
        assert_eq!(reads[0].filesize, on_disk);
    }

    #[test]
    fn in_memory_volume_passes_through_without_logging() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let vol = ramp();
        let loaded = load_volume(vol.clone().into(), "task", &log).unwrap();
        assert_eq!(loaded, vol);
        assert!(!log.exists());
    }

    #[test]
    fn existing_file_is_kept_when_overwrite_is_off() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let target = tmp.path().join("keep.nii");
        std::fs::write(&target, b"original").unwrap();

        let mut vol = ramp();
        save_volume(&target, &mut vol, None, false, "task", &log).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert_eq!(read_entries(&log, "task", "write").unwrap().len(), 1);
    }

    #[test]
    fn unencodable_volume_is_a_soft_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let target = tmp.path().join("bad.nii");
        let mut vol = Volume::new(ArrayD::zeros(IxDyn(&[1; 8])), Matrix4::identity());

        save_volume(&target, &mut vol, None, true, "task", &log).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn missing_or_corrupt_files_fail_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let missing = tmp.path().join("missing.nii");
        let err = load_volume(missing.into(), "task", &log).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));

        let junk = tmp.path().join("junk.nii");
        std::fs::write(&junk, vec![0u8; 400]).unwrap();
        let err = load_volume(junk.into(), "task", &log).unwrap_err();
        assert!(matches!(err, Error::Nifti(_)));
    }
    #[test]
    fn corrupt_header_on_disk_is_an_error_not_a_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let mut bytes = nifti::encode(&ramp()).unwrap();
        // vox_offset field
        bytes[108..112].copy_from_slice(&1e30f32.to_le_bytes());
        let target = tmp.path().join("corrupt.nii.gz");
        std::fs::write(&target, nifti::gzip(&bytes).unwrap()).unwrap();

        let err = load_volume(target.into(), "task", &log).unwrap_err();
        assert!(matches!(
            err,
            Error::Nifti(crate::error::NiftiError::BadVoxOffset(_))
        ));
    }
}
