//! CRUISE cortical reconstruction: gray/white and gray/CSF boundary level
//! sets, central surface, thickness and corrected tissue probabilities from
//! an initial WM mask and tissue probability maps.

use crate::config::Settings;
use crate::engine::marshal::{
    as_float32, as_int32, check_dims, flatten_column_major, flatten_column_major_i32,
    reshape_column_major, spatial_dims,
};
use crate::engine::{start_runtime, CruiseEngine, EngineRuntime, Topology};
use crate::error::Result;
use crate::io::output::{
    file_name_for_saving, output_dir_for_saving, OutputItem, ResultBundle, SaveOptions,
};
use crate::io::time_log::{now_seconds, time_log};
use crate::io::volume::{DataType, Volume};
use crate::io::{load_volume, save_volume, VolumeSource};
use ndarray::ArrayD;
use std::path::{Path, PathBuf};

const TASK: &str = "cruise_cortex_extraction";

/// Bundle key and file suffix of every CRUISE output, in output order.
pub const OUTPUTS: [(&str, &str); 8] = [
    ("cortex", "cruise-cortex"),
    ("gwb", "cruise-gwb"),
    ("cgb", "cruise-cgb"),
    ("avg", "cruise-avg"),
    ("thickness", "cruise-thick"),
    ("pwm", "cruise-pwm"),
    ("pgm", "cruise-pgm"),
    ("pcsf", "cruise-pcsf"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CruiseParams {
    /// Initial WM segmentation (> 0 inside WM).
    pub init_image: VolumeSource,
    /// Filled WM probability, including subcortical GM and ventricles.
    pub wm_image: VolumeSource,
    pub gm_image: VolumeSource,
    /// Sulcal CSF and background probability.
    pub csf_image: VolumeSource,
    /// Vessels and dura to exclude, if available.
    pub vd_image: Option<VolumeSource>,
    pub data_weight: f64,
    pub regularization_weight: f64,
    pub max_iterations: usize,
    pub normalize_probabilities: bool,
    pub correct_wm_pv: bool,
    pub wm_dropoff_dist: f64,
    pub topology: Topology,
    pub topology_lut_dir: Option<PathBuf>,
    pub save: SaveOptions,
    pub log_file: Option<PathBuf>,
}

impl CruiseParams {
    pub fn new(
        init_image: impl Into<VolumeSource>,
        wm_image: impl Into<VolumeSource>,
        gm_image: impl Into<VolumeSource>,
        csf_image: impl Into<VolumeSource>,
    ) -> Self {
        Self {
            init_image: init_image.into(),
            wm_image: wm_image.into(),
            gm_image: gm_image.into(),
            csf_image: csf_image.into(),
            vd_image: None,
            data_weight: 0.4,
            regularization_weight: 0.1,
            max_iterations: 500,
            normalize_probabilities: false,
            correct_wm_pv: true,
            wm_dropoff_dist: 1.0,
            topology: Topology::Wcs,
            topology_lut_dir: None,
            save: SaveOptions::default(),
            log_file: None,
        }
    }
}

/// Output file paths, named after the GM probability image.
pub fn output_files(save: &SaveOptions, gm_root: Option<&Path>) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir_for_saving(save.output_dir.as_deref(), gm_root)?;
    OUTPUTS
        .iter()
        .map(|(_, suffix)| {
            let name = file_name_for_saving(
                save.file_name.as_deref(),
                gm_root,
                suffix,
                save.file_extension.as_deref(),
            )?;
            Ok(output_dir.join(name))
        })
        .collect()
}

/// Previous results that can be returned as-is. Existence only: stale
/// files from a run with other parameters are not detected.
fn cached_results(files: &[PathBuf]) -> Option<ResultBundle> {
    if !files.iter().all(|f| f.is_file()) {
        return None;
    }
    let mut bundle = ResultBundle::new();
    for ((name, _), file) in OUTPUTS.iter().zip(files) {
        bundle.insert(*name, OutputItem::File(file.clone()));
    }
    Some(bundle)
}

pub fn cruise_cortex_extraction(
    runtime: &dyn EngineRuntime,
    settings: &Settings,
    params: CruiseParams,
) -> Result<ResultBundle> {
    tracing::info!("CRUISE cortical extraction");
    let start = now_seconds();
    let log_file = params.log_file.clone().unwrap_or_else(|| settings.log_file.clone());

    let bundle = run(runtime, settings, params, &log_file)?;

    time_log(&log_file, TASK, "makespan", None, start, now_seconds())?;
    Ok(bundle)
}

fn run(
    runtime: &dyn EngineRuntime,
    settings: &Settings,
    params: CruiseParams,
    log_file: &Path,
) -> Result<ResultBundle> {
    let CruiseParams {
        init_image,
        wm_image,
        gm_image,
        csf_image,
        vd_image,
        data_weight,
        regularization_weight,
        max_iterations,
        normalize_probabilities,
        correct_wm_pv,
        wm_dropoff_dist,
        topology,
        topology_lut_dir,
        save,
        ..
    } = params;

    let lut_dir = settings.check_topology_lut_dir(topology_lut_dir.as_deref());
    if data_weight + regularization_weight > 1.0 {
        tracing::warn!(
            "data_weight + regularization_weight = {} exceeds 1",
            data_weight + regularization_weight
        );
    }

    let files = if save.save_data {
        let files = output_files(&save, gm_image.path())?;
        if !save.overwrite {
            if let Some(bundle) = cached_results(&files) {
                tracing::info!("skip computation (use existing results)");
                return Ok(bundle);
            }
        }
        Some(files)
    } else {
        None
    };

    let init = load_volume(init_image, TASK, log_file)?;
    let dims = spatial_dims(&init)?;
    check_dims(&init, dims)?;
    let resolution = init.header.spatial_zooms();

    let mut probabilities = Vec::with_capacity(4);
    for source in [Some(wm_image), Some(gm_image), Some(csf_image), vd_image]
        .into_iter()
        .flatten()
    {
        let volume = load_volume(source, TASK, log_file)?;
        check_dims(&volume, dims)?;
        probabilities.push(flatten_column_major(&volume.data));
    }

    start_runtime(runtime, &settings.vm_memory)?;
    let mut cruise = runtime.create_cruise()?;

    cruise.set_data_weight(data_weight);
    cruise.set_regularization_weight(regularization_weight);
    cruise.set_max_iterations(max_iterations);
    cruise.set_normalize_probabilities(normalize_probabilities);
    cruise.set_correct_wm_gm_partial_voluming(correct_wm_pv);
    cruise.set_wm_dropoff_distance(wm_dropoff_dist);
    cruise.set_topology(topology);
    cruise.set_topology_lut_directory(&lut_dir);

    cruise.set_dimensions(dims);
    cruise.set_resolutions(resolution);
    cruise.import_initial_wm_segmentation(flatten_column_major_i32(&init.data));

    let mut probabilities = probabilities.into_iter();
    if let Some(wm) = probabilities.next() {
        cruise.set_filled_wm_probability(wm);
    }
    if let Some(gm) = probabilities.next() {
        cruise.set_gm_probability(gm);
    }
    if let Some(csf) = probabilities.next() {
        cruise.set_csf_and_bg_probability(csf);
    }
    if let Some(vd) = probabilities.next() {
        cruise.set_veins_and_dura_probability(vd);
    }

    if let Err(e) = cruise.execute() {
        tracing::error!("the underlying engine did not execute cleanly: {}", e);
        return Err(e.into());
    }

    let outputs = collect_outputs(cruise.as_ref(), dims, &init)?;

    let mut bundle = ResultBundle::new();
    match files {
        Some(files) => {
            for ((name, mut volume), file) in outputs.into_iter().zip(files) {
                save_volume(&file, &mut volume, None, true, TASK, log_file)?;
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

/// Display range is one-sided: both ends are set to the NaN-ignoring maximum.
fn output_volume(data: ArrayD<f64>, reference: &Volume, datatype: DataType) -> Volume {
    let mut header = reference.header.clone();
    header.datatype = datatype;
    let mut volume = Volume::with_header(data, reference.affine, header);
    let max = volume.nanmax();
    volume.header.cal_min = max;
    volume.header.cal_max = max;
    volume
}

fn collect_outputs(
    cruise: &dyn CruiseEngine,
    dims: [usize; 3],
    reference: &Volume,
) -> Result<Vec<(&'static str, Volume)>> {
    let cortex = as_int32(reshape_column_major(cruise.cortex_mask(), dims, "cortex")?);
    let mut outputs = vec![("cortex", output_volume(cortex, reference, DataType::Int32))];

    let float_outputs = [
        ("gwb", cruise.wm_gm_levelset()),
        ("cgb", cruise.gm_csf_levelset()),
        ("avg", cruise.central_levelset()),
        ("thickness", cruise.cortical_thickness()),
        ("pwm", cruise.cerebral_wm_probability()),
        ("pgm", cruise.cortical_gm_probability()),
        ("pcsf", cruise.sulcal_csf_probability()),
    ];
    for (name, buffer) in float_outputs {
        let data = as_float32(reshape_column_major(buffer, dims, name)?);
        outputs.push((name, output_volume(data, reference, DataType::Float32)));
    }
    Ok(outputs)
}
