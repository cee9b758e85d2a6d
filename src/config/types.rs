//! Configuration types and defaults for bcdi-post.
//!
//! This module defines the closed-set enums, value types, and default value
//! functions used by the Config struct. Every enum here corresponds to a
//! parameter with a documented closed domain; serde rejects anything outside
//! the set at parse time.

use serde::{Deserialize, Serialize};

/// Supported beamlines for the experiment geometry.
///
/// Only the geometry conventions matter here; raw-data loading is delegated
/// to external loaders and stays out of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Beamline {
    #[default]
    #[serde(rename = "ID01")]
    Id01,
    #[serde(rename = "ID01BLISS")]
    Id01Bliss,
    #[serde(rename = "SIXS_2018")]
    Sixs2018,
    #[serde(rename = "SIXS_2019")]
    Sixs2019,
    #[serde(rename = "CRISTAL")]
    Cristal,
    #[serde(rename = "P10")]
    P10,
    #[serde(rename = "NANOMAX")]
    Nanomax,
    #[serde(rename = "34ID")]
    ThirtyFourId,
}

/// Scanned rotation axis during acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RockingAngle {
    #[default]
    Outofplane,
    Inplane,
    Energy,
}

/// Metric used to rank candidate reconstructions before averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortMethod {
    #[default]
    #[serde(rename = "mean_amplitude")]
    MeanAmplitude,
    #[serde(rename = "variance")]
    Variance,
    #[serde(rename = "variance/mean")]
    VarianceOverMean,
    #[serde(rename = "volume")]
    Volume,
}

/// Space in which candidate reconstructions are compared for averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AveragingSpace {
    #[default]
    ReciprocalSpace,
    DirectSpace,
}

/// Frame the reconstructed data lies in when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataFrame {
    #[default]
    Detector,
    Crystal,
    Laboratory,
}

/// Frame the results are expressed in when saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveFrame {
    #[default]
    Crystal,
    Laboratory,
    LabFlatSample,
}

/// Method for interpolating detector-frame data onto an orthonormal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    #[default]
    Linearization,
    Xrayutilities,
}

/// Direct-space centering method applied to the modulus before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectSpaceCentering {
    #[default]
    MaxCom,
    Max,
    Com,
    /// Leave the object where it is (mode decompositions are pre-centered).
    Skip,
}

/// Reciprocal-space centering method used when locating the Bragg peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReciprocalSpaceCentering {
    #[default]
    MaxCom,
    Max,
    Com,
}

/// Nested centering-method mapping: one entry per space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CenteringMethod {
    pub direct_space: DirectSpaceCentering,
    pub reciprocal_space: ReciprocalSpaceCentering,
}

/// Filtering window used for apodization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApodizationWindow {
    #[default]
    Blackman,
    Tukey,
    Normal,
}

/// Strain computation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrainMethod {
    #[default]
    Default,
    /// Mask the support interior so that strain around defects stands out.
    Defect,
}

/// Method for estimating the optical path through the crystal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpticalPathMethod {
    #[default]
    Threshold,
    Defect,
}

/// Method for removing the phase offset over the support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMethod {
    #[default]
    Mean,
    Com,
}

/// Reference axis of the array the q vector is aligned to.
///
/// Axis order follows the array convention: z is axis 0 (downstream),
/// y is axis 1 (vertical up), x is axis 2 (outboard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefAxis {
    X,
    #[default]
    Y,
    Z,
}

impl RefAxis {
    /// Array axis index for this reference axis (z-y-x order).
    pub fn array_axis(self) -> usize {
        match self {
            RefAxis::Z => 0,
            RefAxis::Y => 1,
            RefAxis::X => 2,
        }
    }

    /// Unit vector in z-y-x array order.
    pub fn unit_vector(self) -> [f64; 3] {
        match self {
            RefAxis::Z => [1.0, 0.0, 0.0],
            RefAxis::Y => [0.0, 1.0, 0.0],
            RefAxis::X => [0.0, 0.0, 1.0],
        }
    }
}

/// Direction of plot tick marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TickDirection {
    #[default]
    Out,
    In,
    Inout,
}

/// User-defined voxel size for the interpolation: one size for all axes,
/// or one size per axis (z, y, x).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixVoxel {
    Isotropic(f64),
    PerAxis([f64; 3]),
}

impl FixVoxel {
    /// Expand to per-axis voxel sizes in z-y-x order.
    pub fn per_axis(&self) -> [f64; 3] {
        match *self {
            FixVoxel::Isotropic(v) => [v, v, v],
            FixVoxel::PerAxis(v) => v,
        }
    }
}

/// A motor entry in `custom_motors`.
///
/// A bare identifier is a cross-reference to another top-level key of the
/// configuration, not a literal string; it resolves to that key's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MotorValue {
    Number(f64),
    Values(Vec<f64>),
    Reference(String),
}

// Default value functions for serde
pub(crate) fn default_true() -> bool {
    true
}
pub(crate) fn default_scans() -> Vec<u32> {
    vec![1]
}
pub(crate) fn default_sample_name() -> Vec<String> {
    vec!["S".to_string()]
}
pub(crate) fn default_detector() -> String {
    "Maxipix".to_string()
}
pub(crate) fn default_beam_direction() -> [f64; 3] {
    // z downstream, y vertical up, x outboard
    [1.0, 0.0, 0.0]
}
pub(crate) fn default_sample_offsets() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}
pub(crate) fn default_binning() -> [usize; 3] {
    [1, 1, 1]
}
pub(crate) fn default_roll_modes() -> [i64; 3] {
    [0, 0, 0]
}
pub(crate) fn default_isosurface_strain() -> f64 {
    0.2
}
pub(crate) fn default_correlation_threshold() -> f64 {
    0.9
}
pub(crate) fn default_threshold_gradient() -> f64 {
    1.0
}
pub(crate) fn default_threshold_unwrap_refraction() -> f64 {
    0.05
}
pub(crate) fn default_half_width_avg_phase() -> u32 {
    0
}
pub(crate) fn default_apodization_sigma() -> [f64; 3] {
    [0.30, 0.30, 0.30]
}
pub(crate) fn default_apodization_mu() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}
pub(crate) fn default_apodization_alpha() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}
pub(crate) fn default_colormap() -> String {
    "turbo".to_string()
}
pub(crate) fn default_tick_spacing() -> f64 {
    50.0
}
pub(crate) fn default_tick_length() -> f64 {
    10.0
}
pub(crate) fn default_tick_width() -> f64 {
    2.0
}
