//! Whole-brain segmentation with the multiple-object geometric deformable
//! model (MGDM).
//!
//! Up to four co-registered contrasts drive the segmentation; each one must
//! name an intensity prior from the chosen atlas.

use crate::atlas::PriorCatalog;
use crate::config::Settings;
use crate::engine::marshal::{
    as_float32, as_int32, check_dims, flatten_column_major, reshape_column_major, spatial_dims,
};
use crate::engine::{start_runtime, EngineRuntime, MgdmEngine, Topology};
use crate::error::{Result, ValidationError};
use crate::io::output::{
    file_name_for_saving, output_dir_for_saving, OutputItem, ResultBundle, SaveOptions,
};
use crate::io::volume::{DataType, Volume};
use crate::io::{load_volume, save_volume, VolumeSource};
use crate::orientation;
use ndarray::ArrayD;
use std::path::PathBuf;

const TASK: &str = "mgdm_segmentation";
/// File suffixes, in output order.
const SUFFIXES: [&str; 4] = ["mgdm_seg", "mgdm_lbls", "mgdm_mems", "mgdm_dist"];
pub const MAX_CONTRASTS: usize = 4;

/// One input slot: an image and the atlas prior describing its contrast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContrastChannel {
    pub image: Option<VolumeSource>,
    pub kind: Option<String>,
}

impl ContrastChannel {
    pub fn new(image: impl Into<VolumeSource>, kind: &str) -> Self {
        Self {
            image: Some(image.into()),
            kind: Some(kind.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MgdmParams {
    pub contrasts: [ContrastChannel; MAX_CONTRASTS],
    /// Number of MGDM steps; 0 only registers the priors.
    pub n_steps: usize,
    pub topology: Topology,
    pub atlas_file: Option<PathBuf>,
    pub topology_lut_dir: Option<PathBuf>,
    pub adjust_intensity_priors: bool,
    pub compute_posterior: bool,
    pub diffuse_probabilities: bool,
    pub save: SaveOptions,
    /// Overrides the configured time-log path.
    pub log_file: Option<PathBuf>,
}

impl MgdmParams {
    pub fn new(image: impl Into<VolumeSource>, kind: &str) -> Self {
        Self {
            contrasts: [
                ContrastChannel::new(image, kind),
                ContrastChannel::default(),
                ContrastChannel::default(),
                ContrastChannel::default(),
            ],
            n_steps: 5,
            topology: Topology::Wcs,
            atlas_file: None,
            topology_lut_dir: None,
            adjust_intensity_priors: false,
            compute_posterior: false,
            diffuse_probabilities: false,
            save: SaveOptions::default(),
            log_file: None,
        }
    }

    /// Fills the 1-based channel slot `index`.
    pub fn with_contrast(mut self, index: usize, channel: ContrastChannel) -> Self {
        if (1..=MAX_CONTRASTS).contains(&index) {
            self.contrasts[index - 1] = channel;
        }
        self
    }
}

/// Checks every slot against the catalog, in slot order.
pub fn validate_contrasts(
    contrasts: &[ContrastChannel],
    catalog: &PriorCatalog,
) -> std::result::Result<(), ValidationError> {
    for (i, channel) in contrasts.iter().enumerate() {
        let index = i + 1;
        match (&channel.image, &channel.kind) {
            (Some(_), None) => return Err(ValidationError::MissingContrastType { index }),
            (_, Some(kind)) if !catalog.contains(kind) => {
                return Err(ValidationError::UnknownContrastType {
                    kind: kind.clone(),
                    index,
                    valid: catalog.priors().to_vec(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Number of leading slots that carry an image.
///
/// Channel K is only used when channel K-1 is present; anything after the
/// first empty slot is dropped with a warning.
pub fn contiguous_channels(contrasts: &[ContrastChannel]) -> usize {
    let used = contrasts.iter().take_while(|c| c.image.is_some()).count();
    for (i, channel) in contrasts.iter().enumerate().skip(used) {
        if channel.image.is_some() {
            tracing::warn!(
                "contrast_image{} is ignored because contrast_image{} is missing",
                i + 1,
                used + 1
            );
        }
    }
    used
}

fn output_volume(data: ArrayD<f64>, reference: &Volume, datatype: DataType) -> Volume {
    let mut header = reference.header.clone();
    header.datatype = datatype;
    let mut volume = Volume::with_header(data, reference.affine, header);
    volume.header.cal_max = volume.max();
    volume
}

pub fn mgdm_segmentation(
    runtime: &dyn EngineRuntime,
    settings: &Settings,
    params: MgdmParams,
) -> Result<ResultBundle> {
    tracing::info!("MGDM segmentation");
    let MgdmParams {
        contrasts,
        n_steps,
        topology,
        atlas_file,
        topology_lut_dir,
        adjust_intensity_priors,
        compute_posterior,
        diffuse_probabilities,
        save,
        log_file,
    } = params;
    let log_file = log_file.unwrap_or_else(|| settings.log_file.clone());

    let atlas_file = settings.check_atlas_file(atlas_file.as_deref());
    let lut_dir = settings.check_topology_lut_dir(topology_lut_dir.as_deref());

    let catalog = PriorCatalog::parse(&atlas_file)?;
    validate_contrasts(&contrasts, &catalog)?;

    let used = contiguous_channels(&contrasts);
    if used == 0 {
        return Err(ValidationError::MissingPrimaryContrast.into());
    }

    let root_path = contrasts[0]
        .image
        .as_ref()
        .and_then(|s| s.path())
        .map(|p| p.to_path_buf());

    // load everything up front so bad inputs fail before the engine starts
    let mut inputs: Vec<(usize, Volume, String)> = Vec::with_capacity(used);
    for (i, channel) in contrasts.into_iter().take(used).enumerate() {
        let (Some(image), Some(kind)) = (channel.image, channel.kind) else {
            return Err(ValidationError::MissingContrastType { index: i + 1 }.into());
        };
        let volume = load_volume(image, TASK, &log_file)?;
        inputs.push((i + 1, volume, kind));
    }

    let reference = &inputs[0].1;
    let dims = spatial_dims(reference)?;
    let resolution = reference.header.spatial_zooms();
    let orientation = orientation::resolve(&reference.affine)?;
    for (_, volume, _) in &inputs {
        check_dims(volume, dims)?;
    }

    // output names are settled before any compute is spent
    let files = if save.save_data {
        let output_dir = output_dir_for_saving(save.output_dir.as_deref(), root_path.as_deref())?;
        let files = SUFFIXES
            .iter()
            .map(|suffix| {
                file_name_for_saving(
                    save.file_name.as_deref(),
                    root_path.as_deref(),
                    suffix,
                    save.file_extension.as_deref(),
                )
                .map(|name| output_dir.join(name))
            })
            .collect::<Result<Vec<PathBuf>>>()?;
        Some(files)
    } else {
        None
    };

    start_runtime(runtime, &settings.vm_memory)?;
    let mut mgdm = runtime.create_mgdm()?;

    mgdm.set_atlas_file(&atlas_file);
    mgdm.set_topology_lut_directory(&lut_dir);
    mgdm.set_output_images("segmentation");
    mgdm.set_adjust_intensity_priors(adjust_intensity_priors);
    mgdm.set_compute_posterior(compute_posterior);
    mgdm.set_diffuse_probabilities(diffuse_probabilities);
    mgdm.set_steps(n_steps);
    mgdm.set_topology(topology);

    mgdm.set_dimensions(dims);
    mgdm.set_resolutions(resolution);
    mgdm.set_orientations(orientation);

    for (index, volume, kind) in &inputs {
        mgdm.set_contrast_image(*index, flatten_column_major(&volume.data));
        mgdm.set_contrast_type(*index, kind);
    }

    tracing::info!("executing MGDM on {} contrast(s)", inputs.len());
    if let Err(e) = mgdm.execute() {
        tracing::error!("the underlying engine did not execute cleanly: {}", e);
        return Err(e.into());
    }

    let outputs = collect_outputs(mgdm.as_ref(), dims, reference)?;

    let mut bundle = ResultBundle::new();
    match files {
        Some(files) => {
            tracing::info!("saving outputs next to {}", files[0].display());
            for ((name, mut volume), file) in outputs.into_iter().zip(files) {
                save_volume(&file, &mut volume, None, true, TASK, &log_file)?;
                bundle.insert(name, OutputItem::File(file));
            }
        }
        None => {
            for (name, volume) in outputs {
                bundle.insert(name, OutputItem::Volume(volume));
            }
        }
    }
    Ok(bundle)
}

/// Reshapes the four engine results; each output gets its own display maximum.
fn collect_outputs(
    mgdm: &dyn MgdmEngine,
    dims: [usize; 3],
    reference: &Volume,
) -> Result<Vec<(&'static str, Volume)>> {
    let seg = as_int32(reshape_column_major(mgdm.segmented_brain_image(), dims, "segmentation")?);
    let lbls = as_int32(reshape_column_major(mgdm.posterior_maximum_labels(), dims, "labels")?);
    let mems = as_float32(reshape_column_major(
        mgdm.posterior_maximum_memberships(),
        dims,
        "memberships",
    )?);
    let dist = as_float32(reshape_column_major(mgdm.levelset_boundary_image(), dims, "distance")?);

    Ok(vec![
        ("segmentation", output_volume(seg, reference, DataType::Int32)),
        ("labels", output_volume(lbls, reference, DataType::Int32)),
        ("memberships", output_volume(mems, reference, DataType::Float32)),
        ("distance", output_volume(dist, reference, DataType::Float32)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, Error};
    use crate::io::time_log::read_entries;
    use crate::utils::test_utils::{index_volume, scaled_affine, write_atlas, FakeRuntime};
    use std::path::Path;

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            default_atlas: write_atlas(dir, &["T1map7T", "Mp2rage7T", "Flair"]),
            topology_lut_dir: dir.join("lut"),
            log_file: dir.join("timelog.json"),
            ..Settings::default()
        }
    }

    #[test]
    fn missing_type_names_the_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let vol = index_volume([3, 3, 3], scaled_affine([1.0; 3]));
        let params = MgdmParams::new(vol.clone(), "T1map7T").with_contrast(
            2,
            ContrastChannel {
                image: Some(vol.into()),
                kind: None,
            },
        );

        let err = mgdm_segmentation(&runtime, &settings, params).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingContrastType { index: 2 })
        ));
        assert!(err.to_string().contains("contrast_type2"));
        assert_eq!(runtime.engines_created(), 0);
        assert_eq!(runtime.init_attempts(), 0);
    }

    #[test]
    fn unknown_type_lists_the_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let vol = index_volume([3, 3, 3], scaled_affine([1.0; 3]));

        let err = mgdm_segmentation(&runtime, &settings, MgdmParams::new(vol, "T2star")).unwrap_err();
        match err {
            Error::Validation(ValidationError::UnknownContrastType { kind, index, valid }) => {
                assert_eq!(kind, "T2star");
                assert_eq!(index, 1);
                assert_eq!(valid, vec!["T1map7T", "Mp2rage7T", "Flair"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn duplicate_priors_still_validate() {
        let tmp = tempfile::tempdir().unwrap();
        let atlas = write_atlas(tmp.path(), &["Flair", "Flair"]);
        let catalog = PriorCatalog::parse(&atlas).unwrap();
        assert_eq!(catalog.len(), 2);
        let vol = index_volume([2, 2, 2], scaled_affine([1.0; 3]));
        let channels = [ContrastChannel::new(vol, "Flair")];
        assert!(validate_contrasts(&channels, &catalog).is_ok());
    }

    #[test]
    fn channels_after_a_gap_are_dropped() {
        let vol = index_volume([2, 2, 2], scaled_affine([1.0; 3]));
        let channels = [
            ContrastChannel::new(vol.clone(), "T1map7T"),
            ContrastChannel::default(),
            ContrastChannel::new(vol.clone(), "Flair"),
            ContrastChannel::new(vol, "Flair"),
        ];
        assert_eq!(contiguous_channels(&channels), 1);
    }

    #[test]
    fn in_memory_run_configures_engine_and_keeps_voxel_order() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let affine = scaled_affine([0.8, 0.9, 1.2]);
        let t1 = index_volume([4, 3, 2], affine);
        let flair = index_volume([4, 3, 2], affine);
        let skipped = index_volume([4, 3, 2], affine);

        let mut params = MgdmParams::new(t1.clone(), "T1map7T")
            .with_contrast(2, ContrastChannel::new(flair, "Flair"))
            .with_contrast(4, ContrastChannel::new(skipped, "Flair"));
        params.n_steps = 0;
        params.topology = Topology::None;

        let bundle = mgdm_segmentation(&runtime, &settings, params).unwrap();
        assert_eq!(
            bundle.keys().collect::<Vec<_>>(),
            vec!["segmentation", "labels", "memberships", "distance"]
        );

        let seg = bundle.volume("segmentation").unwrap();
        assert_eq!(seg.data, t1.data);
        assert_eq!(seg.affine, affine);
        assert_eq!(seg.header.cal_max, 10_203.0);
        assert_eq!(seg.header.datatype, DataType::Int32);

        let labels = bundle.volume("labels").unwrap();
        assert_eq!(labels.data[[1, 0, 0]], 1.0);
        assert_eq!(labels.data[[0, 1, 0]], 4.0);
        assert_eq!(labels.header.cal_max, 23.0);
        assert_eq!(bundle.volume("memberships").unwrap().header.cal_max, 0.5);
        assert_eq!(bundle.volume("distance").unwrap().header.cal_max, 2.0 * 10_203.0);

        let calls = runtime.calls();
        assert!(calls.contains(&"mgdm.dimensions [4, 3, 2]".to_string()));
        assert!(calls.contains(&"mgdm.steps 0".to_string()));
        assert!(calls.contains(&"mgdm.topology no".to_string()));
        assert!(calls.contains(&"mgdm.contrast_type2 Flair".to_string()));
        assert!(!runtime.called("mgdm.contrast_image3"));
        assert!(!runtime.called("mgdm.contrast_image4"));
        assert!(calls.iter().any(|c| c.starts_with("mgdm.lut") && c.ends_with(std::path::MAIN_SEPARATOR)));
    }

    #[test]
    fn engine_failure_propagates_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::failing_execute("java.lang.OutOfMemoryError");
        let vol = index_volume([2, 2, 2], scaled_affine([1.0; 3]));

        let err = mgdm_segmentation(&runtime, &settings, MgdmParams::new(vol, "T1map7T")).unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(EngineError::Execution(ref msg)) if msg == "java.lang.OutOfMemoryError"
        ));
    }

    #[test]
    fn mismatched_channel_shape_is_rejected_before_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let params = MgdmParams::new(index_volume([3, 3, 3], scaled_affine([1.0; 3])), "T1map7T")
            .with_contrast(
                2,
                ContrastChannel::new(index_volume([3, 3, 4], scaled_affine([1.0; 3])), "Flair"),
            );

        let err = mgdm_segmentation(&runtime, &settings, params).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::ShapeMismatch { .. })));
        assert_eq!(runtime.engines_created(), 0);
    }

    #[test]
    fn saved_run_writes_four_files_next_to_the_input() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();

        let input = tmp.path().join("sub-01_T1map.nii.gz");
        let mut t1 = index_volume([3, 2, 2], scaled_affine([1.0; 3]));
        save_volume(&input, &mut t1, None, true, "setup", &settings.log_file).unwrap();

        let mut params = MgdmParams::new(input.as_path(), "T1map7T");
        params.save.save_data = true;

        let bundle = mgdm_segmentation(&runtime, &settings, params).unwrap();
        let expected = [
            ("segmentation", "sub-01_T1map_mgdm_seg.nii.gz"),
            ("labels", "sub-01_T1map_mgdm_lbls.nii.gz"),
            ("memberships", "sub-01_T1map_mgdm_mems.nii.gz"),
            ("distance", "sub-01_T1map_mgdm_dist.nii.gz"),
        ];
        for (key, file) in expected {
            let path = bundle.path(key).unwrap();
            assert_eq!(path, tmp.path().join(file));
            assert!(path.is_file());
        }

        let seg = load_volume(bundle.path("segmentation").unwrap().into(), "check", &settings.log_file)
            .unwrap();
        assert_eq!(seg.data, t1.data);
        assert_eq!(seg.header.datatype, DataType::Int32);
        assert_eq!(seg.affine, t1.affine);
        let dist = load_volume(bundle.path("distance").unwrap().into(), "check", &settings.log_file)
            .unwrap();
        assert_eq!(dist.data, t1.data.mapv(|v| v * 2.0));
        assert_eq!(dist.header.cal_max, 2.0 * 10_102.0);
        assert_eq!(read_entries(&settings.log_file, TASK, "read").unwrap().len(), 1);
        assert_eq!(read_entries(&settings.log_file, TASK, "write").unwrap().len(), 4);
    }
    #[test]
    fn multi_volume_primary_contrast_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let series = Volume::filled(&[3, 3, 3, 2], 1.0, scaled_affine([1.0; 3]));
        let params = MgdmParams::new(series, "T1map7T");

        let err = mgdm_segmentation(&runtime, &settings, params).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::ShapeMismatch { .. })));
        assert_eq!(runtime.engines_created(), 0);
    }

    #[test]
    fn unnamed_in_memory_save_fails_before_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let runtime = FakeRuntime::default();
        let mut params = MgdmParams::new(index_volume([2, 2, 2], scaled_affine([1.0; 3])), "T1map7T");
        params.save = SaveOptions::to_dir(tmp.path().join("out"));

        let err = mgdm_segmentation(&runtime, &settings, params).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingFileName)));
        assert_eq!(runtime.init_attempts(), 0);
        assert!(!runtime.called("mgdm.execute"));
    }
}
