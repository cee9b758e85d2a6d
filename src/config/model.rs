//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters for the BCDI post-processing pipeline.
///
/// This struct represents the contents of the YAML parameter file. Keys are
/// unique, insertion order is irrelevant, and unknown keys are ignored for
/// forward compatibility. A null value means "use the pipeline default or
/// auto-detect". The record is built once per run, validated, and treated as
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Scans and directories
    // =========================================================================
    /// Scan numbers to process, in order.
    #[serde(default = "default_scans")]
    pub scans: Vec<u32>,

    /// Sample name per scan (a single entry is shared by all scans).
    #[serde(default = "default_sample_name")]
    pub sample_name: Vec<String>,

    /// Root of the experiment folder.
    pub root_folder: String,

    /// Save directory per scan; null falls back to the scan folder.
    pub save_dir: Vec<Option<String>>,

    /// Data directory per scan; null falls back to the beamline layout.
    pub data_dir: Vec<Option<String>>,

    /// Comment appended to output file names (empty means no comment).
    pub comment: String,

    /// Enable debug output in the stages.
    pub debug: bool,

    // =========================================================================
    // Beamline geometry
    // =========================================================================
    /// Beamline where the data was acquired.
    pub beamline: Beamline,

    /// Beamline actuator aliases (motor name -> data field).
    pub actuators: BTreeMap<String, String>,

    /// Whether the measurement is a series of frames per point (P10).
    pub is_series: bool,

    /// Scanned rotation axis during acquisition.
    pub rocking_angle: RockingAngle,

    /// Spec/fio log file name per scan; null auto-detects.
    pub specfile_name: Vec<Option<String>>,

    /// X-ray energy in eV; null means read from the log file.
    pub energy: Option<f64>,

    /// Sample to detector distance in m; null means read from the log file.
    pub detector_distance: Option<f64>,

    /// Detector out-of-plane angle in degrees; null means read or retrieve
    /// from the Bragg peak position.
    pub outofplane_angle: Option<f64>,

    /// Detector in-plane angle in degrees; null means read or retrieve.
    pub inplane_angle: Option<f64>,

    /// Angular step of the rocking curve in degrees; null means read.
    pub tilt_angle: Option<f64>,

    /// Sample circle offsets in degrees (same order as the circles).
    #[serde(default = "default_sample_offsets")]
    pub sample_offsets: [f64; 3],

    /// Direct beam position on the unbinned detector [vertical, horizontal].
    pub direct_beam: Option<[f64; 2]>,

    /// Detector angles [outofplane, inplane] for the direct beam measurement.
    pub dirbeam_detector_angles: Option<[f64; 2]>,

    /// Bragg peak position [z, y, x] in the unbinned detector frame;
    /// null means retrieve it from the diffraction data.
    pub bragg_peak: Option<[f64; 3]>,

    /// Incident beam direction in the laboratory frame (z, y, x).
    #[serde(default = "default_beam_direction")]
    pub beam_direction: [f64; 3],

    /// Whether the scan bypassed the beamline log files.
    pub custom_scan: bool,

    /// Motor positions for a custom scan. A bare identifier as a value is a
    /// cross-reference to another top-level key, not a literal string.
    pub custom_motors: BTreeMap<String, MotorValue>,

    // =========================================================================
    // Detector
    // =========================================================================
    /// Detector name.
    #[serde(default = "default_detector")]
    pub detector: String,

    /// Image file template per scan; null auto-detects.
    pub template_imagefile: Vec<Option<String>>,

    /// Region of interest [y0, y1, x0, x1] on the unbinned detector;
    /// null means the full detector.
    pub roi_detector: Option<[i64; 4]>,

    /// Horizontal half-width recentering the ROI around the Bragg peak.
    /// Meaningful only together with `roi_detector`.
    pub center_roi_x: Option<i64>,

    /// Vertical half-width recentering the ROI around the Bragg peak.
    /// Meaningful only together with `roi_detector`.
    pub center_roi_y: Option<i64>,

    /// Detector pixel size override in m; null uses the detector default.
    pub custom_pixelsize: Option<f64>,

    /// Binning (stacking, vertical, horizontal) applied during phasing.
    #[serde(default = "default_binning")]
    pub phasing_binning: [usize; 3],

    /// Binning applied during pre-processing, before phasing.
    #[serde(default = "default_binning")]
    pub preprocessing_binning: [usize; 3],

    // =========================================================================
    // Reconstruction handling
    // =========================================================================
    /// Phase-retrieval output file per scan; null opens a file picker.
    pub reconstruction_files: Vec<Option<String>>,

    /// FFT window shape used during phasing, before binning;
    /// null means read it from the first reconstruction.
    pub original_size: Option<[usize; 3]>,

    /// Keep the full array size instead of cropping to the data range.
    pub keep_size: bool,

    /// Flip the reconstruction (take the complex conjugate twin).
    pub flip_reconstruction: bool,

    /// Roll applied after a mode decomposition (z, y, x).
    #[serde(default = "default_roll_modes")]
    pub roll_modes: [i64; 3],

    /// Metric ranking candidate reconstructions.
    pub sort_method: SortMethod,

    /// Minimum correlation with the reference for a candidate to be averaged.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,

    /// Space in which candidates are correlated for averaging.
    pub averaging_space: AveragingSpace,

    // =========================================================================
    // Frames and interpolation
    // =========================================================================
    /// Frame the loaded data lies in.
    pub data_frame: DataFrame,

    /// Frame used when saving results.
    pub save_frame: SaveFrame,

    /// Interpolation method for detector-frame data.
    pub interpolation_method: InterpolationMethod,

    /// Centering methods per space.
    pub centering_method: CenteringMethod,

    /// User-defined voxel size for the interpolation in nm; null keeps the
    /// voxel sizes derived from the experiment.
    pub fix_voxel: Option<FixVoxel>,

    /// Array axis the diffusion vector is aligned to for strain.
    pub ref_axis_q: RefAxis,

    // =========================================================================
    // Phase and strain
    // =========================================================================
    /// Normalized modulus threshold defining the support.
    #[serde(default = "default_isosurface_strain")]
    pub isosurface_strain: f64,

    /// Strain computation variant.
    pub strain_method: StrainMethod,

    /// Target phase offset over the support after offset removal.
    pub phase_offset: f64,

    /// Voxel (z, y, x) where the phase offset is evaluated; null uses the
    /// whole support.
    pub phase_offset_origin: Option<[f64; 3]>,

    /// Method for evaluating the phase offset over the support.
    pub offset_method: OffsetMethod,

    /// Half-width in voxels of the phase averaging window (0 disables).
    #[serde(default = "default_half_width_avg_phase")]
    pub half_width_avg_phase: u32,

    /// Apply an apodization window in reciprocal space.
    pub apodize: bool,

    /// Apodization window type. Meaningful only when `apodize` is true.
    pub apodization_window: ApodizationWindow,

    /// Sigma of the apodization window per axis.
    #[serde(default = "default_apodization_sigma")]
    pub apodization_sigma: [f64; 3],

    /// Mu of the apodization window per axis.
    #[serde(default = "default_apodization_mu")]
    pub apodization_mu: [f64; 3],

    /// Alpha of the Tukey apodization window per axis.
    #[serde(default = "default_apodization_alpha")]
    pub apodization_alpha: [f64; 3],

    /// Gradient threshold of the support used for ramp removal.
    #[serde(default = "default_threshold_gradient")]
    pub threshold_gradient: f64,

    /// Invert the phase before saving (toward electric field convention).
    #[serde(default = "default_true")]
    pub invert_phase: bool,

    // =========================================================================
    // Refraction correction
    // =========================================================================
    /// Correct the phase for refraction through the crystal.
    pub correct_refraction: bool,

    /// Method estimating the optical path. Meaningful only when
    /// `correct_refraction` is true.
    pub optical_path_method: OpticalPathMethod,

    /// Real part decrement delta of the refractive index. Required when
    /// `correct_refraction` is true.
    pub dispersion: Option<f64>,

    /// Imaginary part beta of the refractive index; null skips the
    /// absorption correction.
    pub absorption: Option<f64>,

    /// Modulus threshold of the support used for unwrapping and refraction.
    #[serde(default = "default_threshold_unwrap_refraction")]
    pub threshold_unwrap_refraction: f64,

    // =========================================================================
    // Saving
    // =========================================================================
    /// Save the results (main switch).
    #[serde(default = "default_true")]
    pub save: bool,

    /// Also save the support.
    pub save_support: bool,

    /// Also save the raw modulus/phase before orthogonalization.
    pub save_rawdata: bool,

    // =========================================================================
    // Plotting
    // =========================================================================
    /// Colormap used by the plotting backend.
    #[serde(default = "default_colormap")]
    pub colormap: String,

    /// Direction of plot tick marks.
    pub tick_direction: TickDirection,

    /// Tick spacing in nm.
    #[serde(default = "default_tick_spacing")]
    pub tick_spacing: f64,

    /// Tick length in points.
    #[serde(default = "default_tick_length")]
    pub tick_length: f64,

    /// Tick width in points.
    #[serde(default = "default_tick_width")]
    pub tick_width: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scans: default_scans(),
            sample_name: default_sample_name(),
            root_folder: String::new(),
            save_dir: Vec::new(),
            data_dir: Vec::new(),
            comment: String::new(),
            debug: false,
            beamline: Beamline::default(),
            actuators: BTreeMap::new(),
            is_series: false,
            rocking_angle: RockingAngle::default(),
            specfile_name: Vec::new(),
            energy: None,
            detector_distance: None,
            outofplane_angle: None,
            inplane_angle: None,
            tilt_angle: None,
            sample_offsets: default_sample_offsets(),
            direct_beam: None,
            dirbeam_detector_angles: None,
            bragg_peak: None,
            beam_direction: default_beam_direction(),
            custom_scan: false,
            custom_motors: BTreeMap::new(),
            detector: default_detector(),
            template_imagefile: Vec::new(),
            roi_detector: None,
            center_roi_x: None,
            center_roi_y: None,
            custom_pixelsize: None,
            phasing_binning: default_binning(),
            preprocessing_binning: default_binning(),
            reconstruction_files: Vec::new(),
            original_size: None,
            keep_size: false,
            flip_reconstruction: false,
            roll_modes: default_roll_modes(),
            sort_method: SortMethod::default(),
            correlation_threshold: default_correlation_threshold(),
            averaging_space: AveragingSpace::default(),
            data_frame: DataFrame::default(),
            save_frame: SaveFrame::default(),
            interpolation_method: InterpolationMethod::default(),
            centering_method: CenteringMethod::default(),
            fix_voxel: None,
            ref_axis_q: RefAxis::default(),
            isosurface_strain: default_isosurface_strain(),
            strain_method: StrainMethod::default(),
            phase_offset: 0.0,
            phase_offset_origin: None,
            offset_method: OffsetMethod::default(),
            half_width_avg_phase: default_half_width_avg_phase(),
            apodize: false,
            apodization_window: ApodizationWindow::default(),
            apodization_sigma: default_apodization_sigma(),
            apodization_mu: default_apodization_mu(),
            apodization_alpha: default_apodization_alpha(),
            threshold_gradient: default_threshold_gradient(),
            invert_phase: default_true(),
            correct_refraction: false,
            optical_path_method: OpticalPathMethod::default(),
            dispersion: None,
            absorption: None,
            threshold_unwrap_refraction: default_threshold_unwrap_refraction(),
            save: default_true(),
            save_support: false,
            save_rawdata: false,
            colormap: default_colormap(),
            tick_direction: TickDirection::default(),
            tick_spacing: default_tick_spacing(),
            tick_length: default_tick_length(),
            tick_width: default_tick_width(),
        }
    }
}
