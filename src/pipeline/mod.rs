//! Pipeline orchestration.
//!
//! Runs the post-processing stages for each configured scan: candidate
//! loading, preprocessing, cropping, sorting and averaging, centering,
//! interpolation into the crystal frame, phase manipulation, strain and
//! output. The configuration is immutable for the whole run; per-scan state
//! lives in the [`crate::setup::Setup`] snapshot.

mod candidates;

pub use candidates::{average_candidates, correlation, sort_candidates};

use crate::adapters::{Orthogonalizer, OutputWriter, QSpaceLoader, ReconstructionLoader, ScanOutput};
use crate::config::{Config, DataFrame, SaveFrame};
use crate::error::{PostError, Result};
use crate::events::{Event, EventSink, Stage};
use crate::interp;
use crate::phase::PhaseManipulator;
use crate::setup::{self, Setup};
use crate::strain;
use crate::volume;
use nalgebra::Vector3;
use serde_json::json;
use std::path::Path;

/// Margin in voxels added around the object when optimizing the data range.
const CROP_MARGIN: usize = 10;

/// How the object reaches the orthogonal crystal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    /// Detector-frame data, interpolated via the linearized transformation.
    Linearization,
    /// Data already orthogonal (laboratory or crystal frame).
    OrthogonalFrame,
}

/// Select the analysis type from the frame of the input data.
pub fn analysis_kind(config: &Config) -> AnalysisKind {
    match config.data_frame {
        DataFrame::Detector => AnalysisKind::Linearization,
        DataFrame::Crystal | DataFrame::Laboratory => AnalysisKind::OrthogonalFrame,
    }
}

/// Per-scan results of a run.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub scan: i64,
    pub candidates_kept: usize,
    pub voxel_sizes_nm: [f64; 3],
    pub q_norm: f64,
    pub extent_phase: Option<f64>,
}

/// Results of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub scans: Vec<ScanSummary>,
}

/// The post-processing orchestrator.
///
/// Collaborators for file formats are injected through the adapter traits;
/// the pipeline owns only the stage sequencing.
pub struct Pipeline<'a> {
    config: &'a Config,
    loader: &'a dyn ReconstructionLoader,
    qspace_loader: &'a dyn QSpaceLoader,
    orthogonalizer: &'a dyn Orthogonalizer,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        loader: &'a dyn ReconstructionLoader,
        qspace_loader: &'a dyn QSpaceLoader,
        orthogonalizer: &'a dyn Orthogonalizer,
    ) -> Self {
        Self {
            config,
            loader,
            qspace_loader,
            orthogonalizer,
        }
    }

    /// Run all configured scans, or a single one when `scan_filter` is set.
    pub fn run(
        &self,
        scan_filter: Option<i64>,
        writer: &mut dyn OutputWriter,
        events: &mut EventSink,
    ) -> Result<RunSummary> {
        let scans: Vec<(usize, i64)> = self
            .config
            .scans
            .iter()
            .enumerate()
            .map(|(index, &scan)| (index, i64::from(scan)))
            .filter(|(_, scan)| scan_filter.is_none_or(|wanted| wanted == *scan))
            .collect();
        if scans.is_empty() {
            return Err(PostError::UserError(format!(
                "scan {} is not listed in the configuration",
                scan_filter.unwrap_or_default()
            )));
        }

        events.record(Event::new(Stage::RunStart).with_details(json!({
            "scans": scans.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
            "data_frame": self.config.data_frame,
            "save_frame": self.config.save_frame,
        })))?;

        let mut summary = RunSummary::default();
        for (index, scan) in scans {
            tracing::info!(scan, "processing scan");
            summary.scans.push(self.run_scan(index, scan, writer, events)?);
        }

        events.record(Event::new(Stage::RunComplete).with_details(json!({
            "scans_processed": summary.scans.len(),
        })))?;
        Ok(summary)
    }

    fn run_scan(
        &self,
        scan_index: usize,
        scan: i64,
        writer: &mut dyn OutputWriter,
        events: &mut EventSink,
    ) -> Result<ScanSummary> {
        let config = self.config;

        // ---- load -----------------------------------------------------------
        let file = config
            .per_scan(&config.reconstruction_files, scan_index)
            .and_then(|entry| entry.as_deref())
            .ok_or_else(|| {
                PostError::UserError(format!(
                    "no reconstruction file configured for scan {}",
                    scan
                ))
            })?;
        let mut candidates = self.loader.load(Path::new(file))?;
        if candidates.is_empty() {
            return Err(PostError::PipelineError(format!(
                "reconstruction file '{}' holds no candidate",
                file
            )));
        }
        events.record(Event::new(Stage::Load).with_scan(scan).with_details(json!({
            "file": file,
            "candidates": candidates.len(),
        })))?;
        tracing::info!(scan, file, candidates = candidates.len(), "candidates loaded");

        // ---- preprocess -----------------------------------------------------
        if config.flip_reconstruction {
            for candidate in &mut candidates {
                *candidate = volume::flip(candidate);
            }
        }
        if config.roll_modes != [0, 0, 0] {
            for candidate in &mut candidates {
                *candidate = volume::roll(candidate, config.roll_modes);
            }
        }
        events
            .record(Event::new(Stage::Preprocess).with_scan(scan).with_details(json!({
                "flipped": config.flip_reconstruction,
                "roll_modes": config.roll_modes,
            })))?;

        // ---- crop to the optimized range ------------------------------------
        if let Some(size) = config.original_size {
            for candidate in &mut candidates {
                *candidate = volume::crop_pad(candidate, size)?;
            }
        }
        let target = volume::find_datarange(
            &volume::modulus(&candidates[0]),
            config.isosurface_strain,
            CROP_MARGIN,
            config.keep_size,
        )?;
        for candidate in &mut candidates {
            *candidate = volume::crop_pad(candidate, target)?;
        }
        events.record(Event::new(Stage::Crop).with_scan(scan).with_details(json!({
            "shape": target,
            "keep_size": config.keep_size,
        })))?;

        // ---- sort and average -----------------------------------------------
        let order = sort_candidates(&candidates, config.sort_method, config.isosurface_strain)?;
        events.record(Event::new(Stage::Sort).with_scan(scan).with_details(json!({
            "method": config.sort_method,
            "order": order,
        })))?;

        let (averaged, kept) = average_candidates(
            &candidates,
            &order,
            config.correlation_threshold,
            config.averaging_space,
        )?;
        events
            .record(Event::new(Stage::Average).with_scan(scan).with_details(json!({
                "kept": kept,
                "total": candidates.len(),
                "space": config.averaging_space,
            })))?;
        tracing::info!(scan, kept, total = candidates.len(), "candidates averaged");

        // ---- direct-space centering -----------------------------------------
        let centered = volume::center_object(&averaged, config.centering_method.direct_space)?;
        events
            .record(Event::new(Stage::Center).with_scan(scan).with_details(json!({
                "method": config.centering_method.direct_space,
            })))?;

        // ---- geometry -------------------------------------------------------
        let mut setup = Setup::from_config(config);
        if setup.angles_correction_needed() {
            let bragg_peak = config.bragg_peak.ok_or_else(|| {
                PostError::PipelineError(
                    "detector angles are undefined and no bragg_peak is available to correct them"
                        .to_string(),
                )
            })?;
            setup.correct_detector_angles(bragg_peak)?;
            tracing::info!(
                scan,
                outofplane = setup.outofplane_angle,
                inplane = setup.inplane_angle,
                "detector angles corrected from the Bragg peak"
            );
        }
        let q_norm = setup.q_norm()?;
        let q_direction = setup.q_direction()?;

        // ---- interpolation into the crystal frame ---------------------------
        let kind = analysis_kind(config);
        let (mut data, mut voxel_sizes_nm) = match kind {
            AnalysisKind::Linearization => self.orthogonalizer.orthogonalize(&centered, &setup)?,
            AnalysisKind::OrthogonalFrame => {
                let qspace = self.qspace_loader.load(scan)?;
                let extents = qspace.extents()?;
                let sizes =
                    setup::voxel_sizes_from_q_extents(extents[0], extents[1], extents[2])?;
                (centered, sizes)
            }
        };
        if let Some(fix_voxel) = &config.fix_voxel {
            let wanted = fix_voxel.per_axis();
            data = interp::regrid(&data, voxel_sizes_nm, wanted)?;
            voxel_sizes_nm = wanted;
        }
        // The orthogonal laboratory-frame path still has q off the reference
        // axis; rotate the object so the strain derivative runs along it.
        let ref_direction = array_to_vector(config.ref_axis_q.unit_vector());
        if config.data_frame == DataFrame::Laboratory {
            data = interp::rotate_to_axis(&data, q_direction, ref_direction, voxel_sizes_nm)?;
        }
        events
            .record(Event::new(Stage::Interpolate).with_scan(scan).with_details(json!({
                "analysis": match kind {
                    AnalysisKind::Linearization => "linearization",
                    AnalysisKind::OrthogonalFrame => "orthogonal_frame",
                },
                "voxel_sizes_nm": voxel_sizes_nm,
            })))?;
        tracing::info!(scan, ?voxel_sizes_nm, "object in the crystal frame");

        // ---- phase ----------------------------------------------------------
        let mut pm = PhaseManipulator::new(&data);
        pm.unwrap_phase(config.threshold_unwrap_refraction);
        events
            .record(Event::new(Stage::UnwrapPhase).with_scan(scan).with_details(json!({
                "extent_phase": pm.extent_phase(),
            })))?;

        pm.remove_ramp(config.threshold_gradient, config.isosurface_strain)?;
        events
            .record(Event::new(Stage::RemoveRamp).with_scan(scan).with_details(json!({
                "ramp": pm.phase_ramp(),
            })))?;

        if config.apodize {
            pm.apodize(
                config.apodization_window,
                config.apodization_sigma,
                config.apodization_mu,
                config.apodization_alpha,
            )?;
            events
                .record(Event::new(Stage::Apodize).with_scan(scan).with_details(json!({
                    "window": config.apodization_window,
                })))?;
        }

        pm.average_phase(config.half_width_avg_phase, config.isosurface_strain);
        pm.remove_offset(
            config.offset_method,
            config.isosurface_strain,
            config.phase_offset,
            config.phase_offset_origin,
        )?;
        pm.center_phase()?;
        events
            .record(Event::new(Stage::PhaseCleanup).with_scan(scan).with_details(json!({
                "half_width": config.half_width_avg_phase,
                "offset_method": config.offset_method,
            })))?;

        // ---- refraction -----------------------------------------------------
        if config.correct_refraction {
            let support = volume::support_from_modulus(
                pm.modulus(),
                config.threshold_unwrap_refraction,
            );
            let path = strain::optical_path(
                &support,
                config.beam_direction,
                voxel_sizes_nm,
                config.optical_path_method,
            )?;
            let wavelength = setup.wavelength_nm()?;
            let dispersion = config.dispersion.ok_or_else(|| {
                PostError::PipelineError("dispersion is not defined".to_string())
            })?;
            let (modulus, phase) = pm.parts_mut();
            strain::correct_refraction(
                modulus,
                phase,
                &path,
                wavelength,
                dispersion,
                config.absorption,
            )?;
            events
                .record(Event::new(Stage::Refraction).with_scan(scan).with_details(json!({
                    "method": config.optical_path_method,
                    "dispersion": dispersion,
                    "absorption": config.absorption,
                })))?;
        }

        // ---- strain ---------------------------------------------------------
        let support = volume::support_from_modulus(pm.modulus(), config.isosurface_strain);
        let strain_field = strain::compute_strain(
            pm.phase(),
            &support,
            voxel_sizes_nm,
            config.ref_axis_q,
            q_norm,
            config.strain_method,
        )?;
        events.record(Event::new(Stage::Strain).with_scan(scan).with_details(json!({
            "method": config.strain_method,
            "ref_axis_q": config.ref_axis_q,
            "q_norm": q_norm,
        })))?;

        // ---- frame transform for saving -------------------------------------
        let extent_phase = pm.extent_phase();
        let mut modulus = pm.modulus().clone();
        let mut phase = pm.phase().clone();
        let mut strain_out = strain_field;
        let mut support_out = support;
        if config.save_frame != SaveFrame::Crystal {
            // Laboratory saving keeps the experiment orientation: re-add the
            // ramp and rotate the reference axis back onto q.
            pm.add_ramp(1.0)?;
            phase = pm.phase().clone();
            modulus = interp::rotate_to_axis(&modulus, ref_direction, q_direction, voxel_sizes_nm)?;
            phase = interp::rotate_to_axis(&phase, ref_direction, q_direction, voxel_sizes_nm)?;
            strain_out =
                interp::rotate_to_axis(&strain_out, ref_direction, q_direction, voxel_sizes_nm)?;
            support_out =
                interp::rotate_to_axis(&support_out, ref_direction, q_direction, voxel_sizes_nm)?;
            // Interpolation blurs the mask; make it binary again.
            support_out.mapv_inplace(|v| if v >= 0.5 { 1.0 } else { 0.0 });
        }
        events
            .record(Event::new(Stage::FrameTransform).with_scan(scan).with_details(json!({
                "save_frame": config.save_frame,
            })))?;

        if config.invert_phase {
            phase.mapv_inplace(|p| -p);
        }

        // ---- save -----------------------------------------------------------
        if config.save {
            let metadata = json!({
                "scan": scan,
                "beamline": config.beamline,
                "detector": config.detector,
                "comment": config.comment,
                "data_frame": config.data_frame,
                "save_frame": config.save_frame,
                "q_norm_inv_nm": q_norm,
                "interplanar_distance_nm": setup.interplanar_distance()?,
                "wavelength_nm": setup.wavelength_nm()?,
                "extent_phase": extent_phase,
                "voxel_sizes_nm": voxel_sizes_nm,
                "candidates_kept": kept,
            });
            writer.write(ScanOutput {
                scan,
                modulus,
                phase,
                strain: strain_out,
                support: config.save_support.then_some(support_out),
                voxel_sizes_nm,
                metadata,
            })?;
        }
        events.record(Event::new(Stage::Save).with_scan(scan).with_details(json!({
            "saved": config.save,
            "save_support": config.save_support,
        })))?;

        Ok(ScanSummary {
            scan,
            candidates_kept: kept,
            voxel_sizes_nm,
            q_norm,
            extent_phase,
        })
    }
}

fn array_to_vector(v: [f64; 3]) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FixedQSpace, IdentityOrthogonalizer, MemoryLoader, MemoryWriter, QSpace};
    use ndarray::Array3;
    use num_complex::Complex64;

    fn test_config(extra: &str) -> Config {
        let yaml = format!(
            r#"
scans: [11]
reconstruction_files: [/data/S11/modes.h5]
energy: 9000
detector_distance: 0.5
outofplane_angle: 35.0
inplane_angle: 0.5
tilt_angle: 0.01
keep_size: true
isosurface_strain: 0.2
{extra}
"#
        );
        Config::from_yaml(&yaml).unwrap()
    }

    /// Box object with a gentle linear phase, two identical candidates.
    fn test_loader(path: &str) -> MemoryLoader {
        let mut data: crate::volume::ComplexVolume = Array3::zeros((12, 12, 12));
        for i in 4..8 {
            for j in 4..8 {
                for k in 4..8 {
                    let phase = 0.02 * i as f64;
                    data[(i, j, k)] = Complex64::from_polar(1.0, phase);
                }
            }
        }
        let mut loader = MemoryLoader::new();
        loader.insert(path, vec![data.clone(), data]);
        loader
    }

    fn test_qspace() -> FixedQSpace {
        FixedQSpace {
            qspace: QSpace {
                qx: vec![2.5, 2.6],
                qz: vec![0.0, 0.1],
                qy: vec![0.0, 0.1],
            },
        }
    }

    fn run_pipeline(config: &Config) -> (MemoryWriter, EventSink, RunSummary) {
        let loader = test_loader("/data/S11/modes.h5");
        let qspace = test_qspace();
        let ortho = IdentityOrthogonalizer {
            voxel_sizes_nm: [5.0; 3],
        };
        let pipeline = Pipeline::new(config, &loader, &qspace, &ortho);
        let mut writer = MemoryWriter::new();
        let mut events = EventSink::Memory(Vec::new());
        let summary = pipeline.run(None, &mut writer, &mut events).unwrap();
        (writer, events, summary)
    }

    #[test]
    fn analysis_kind_follows_data_frame() {
        let config = test_config("data_frame: detector");
        assert_eq!(analysis_kind(&config), AnalysisKind::Linearization);
        let config = test_config("data_frame: laboratory");
        assert_eq!(analysis_kind(&config), AnalysisKind::OrthogonalFrame);
    }

    #[test]
    fn detector_frame_run_produces_one_output() {
        let config = test_config("data_frame: detector\nsave_frame: crystal");
        let (writer, events, summary) = run_pipeline(&config);

        assert_eq!(summary.scans.len(), 1);
        assert_eq!(summary.scans[0].scan, 11);
        assert_eq!(summary.scans[0].candidates_kept, 2);
        assert_eq!(writer.outputs.len(), 1);

        let output = &writer.outputs[0];
        assert_eq!(output.voxel_sizes_nm, [5.0; 3]);
        assert_eq!(output.modulus.dim(), output.strain.dim());
        assert!(output.strain.iter().all(|v| v.is_finite()));

        let stages: Vec<Stage> = events.recorded().iter().map(|e| e.stage).collect();
        assert_eq!(stages.first(), Some(&Stage::RunStart));
        assert_eq!(stages.last(), Some(&Stage::RunComplete));
        assert!(stages.contains(&Stage::UnwrapPhase));
        assert!(stages.contains(&Stage::Strain));
    }

    #[test]
    fn orthogonal_run_takes_voxel_sizes_from_q() {
        let config = test_config("data_frame: laboratory\nsave_frame: crystal");
        let (writer, _events, _summary) = run_pipeline(&config);

        // 2*pi / 0.1 / 10 nm on every axis per the fixed q grids
        let expected = 2.0 * std::f64::consts::PI / 0.1 / 10.0;
        let sizes = writer.outputs[0].voxel_sizes_nm;
        for axis in 0..3 {
            assert!((sizes[axis] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn fix_voxel_overrides_voxel_sizes() {
        let config =
            test_config("data_frame: detector\nsave_frame: crystal\nfix_voxel: 4.0");
        let (writer, _events, _summary) = run_pipeline(&config);
        assert_eq!(writer.outputs[0].voxel_sizes_nm, [4.0; 3]);
    }

    #[test]
    fn save_false_skips_the_writer() {
        let config = test_config("data_frame: detector\nsave_frame: crystal\nsave: false");
        let (writer, events, summary) = run_pipeline(&config);
        assert!(writer.outputs.is_empty());
        assert_eq!(summary.scans.len(), 1);
        // The save stage is still logged
        assert!(events.recorded().iter().any(|e| e.stage == Stage::Save));
    }

    #[test]
    fn save_support_controls_support_output() {
        let config = test_config("data_frame: detector\nsave_frame: crystal\nsave_support: true");
        let (writer, _events, _summary) = run_pipeline(&config);
        assert!(writer.outputs[0].support.is_some());

        let config = test_config("data_frame: detector\nsave_frame: crystal");
        let (writer, _events, _summary) = run_pipeline(&config);
        assert!(writer.outputs[0].support.is_none());
    }

    #[test]
    fn scan_filter_rejects_unknown_scan() {
        let config = test_config("data_frame: detector\nsave_frame: crystal");
        let loader = test_loader("/data/S11/modes.h5");
        let qspace = test_qspace();
        let ortho = IdentityOrthogonalizer {
            voxel_sizes_nm: [5.0; 3],
        };
        let pipeline = Pipeline::new(&config, &loader, &qspace, &ortho);
        let mut writer = MemoryWriter::new();
        let mut events = EventSink::Discard;
        let err = pipeline.run(Some(99), &mut writer, &mut events).unwrap_err();
        assert!(matches!(err, PostError::UserError(_)));
    }

    #[test]
    fn missing_reconstruction_entry_is_a_user_error() {
        let yaml = r#"
scans: [11]
energy: 9000
detector_distance: 0.5
outofplane_angle: 35.0
inplane_angle: 0.5
tilt_angle: 0.01
data_frame: detector
save_frame: crystal
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let loader = MemoryLoader::new();
        let qspace = test_qspace();
        let ortho = IdentityOrthogonalizer {
            voxel_sizes_nm: [5.0; 3],
        };
        let pipeline = Pipeline::new(&config, &loader, &qspace, &ortho);
        let mut writer = MemoryWriter::new();
        let mut events = EventSink::Discard;
        let err = pipeline.run(None, &mut writer, &mut events).unwrap_err();
        assert!(matches!(err, PostError::UserError(_)));
    }

    #[test]
    fn laboratory_saving_re_adds_the_ramp() {
        let config = test_config("data_frame: detector\nsave_frame: laboratory");
        let (writer, events, _summary) = run_pipeline(&config);
        assert_eq!(writer.outputs.len(), 1);
        assert!(
            events
                .recorded()
                .iter()
                .any(|e| e.stage == Stage::FrameTransform)
        );
    }

    #[test]
    fn laboratory_support_stays_binary() {
        let config = test_config(
            "data_frame: detector\nsave_frame: laboratory\nsave_support: true",
        );
        let (writer, _events, _summary) = run_pipeline(&config);

        let support = writer.outputs[0].support.as_ref().unwrap();
        assert!(support.iter().any(|&v| v == 1.0));
        assert!(support.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn angles_recovered_from_bragg_peak() {
        let yaml = r#"
scans: [11]
reconstruction_files: [/data/S11/modes.h5]
energy: 9000
detector_distance: 0.5
tilt_angle: 0.01
keep_size: true
data_frame: detector
save_frame: crystal
direct_beam: [208.0, 362.0]
dirbeam_detector_angles: [0.0, 0.0]
bragg_peak: [64, 108, 412]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let loader = test_loader("/data/S11/modes.h5");
        let qspace = test_qspace();
        let ortho = IdentityOrthogonalizer {
            voxel_sizes_nm: [5.0; 3],
        };
        let pipeline = Pipeline::new(&config, &loader, &qspace, &ortho);
        let mut writer = MemoryWriter::new();
        let mut events = EventSink::Discard;
        let summary = pipeline.run(None, &mut writer, &mut events).unwrap();
        assert!(summary.scans[0].q_norm > 0.0);
    }
}
