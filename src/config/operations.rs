//! Config loading, validation, and cross-reference resolution.

use super::model::Config;
use super::types::{DataFrame, InterpolationMethod, MotorValue, SaveFrame};
use crate::error::{PostError, Result};
use std::collections::BTreeMap;
use std::path::Path;

impl Config {
    /// Load the parameter file from a YAML file.
    ///
    /// Unknown keys in the YAML are silently ignored for forward
    /// compatibility. The returned record is validated and must be treated as
    /// immutable for the rest of the run.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            PostError::UserError(format!(
                "failed to read parameter file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse the parameter file from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| PostError::ConfigError(format!("failed to parse YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| PostError::UserError(format!("failed to serialize to YAML: {}", e)))
    }

    /// Validate parameter values and return an error on the first violation.
    ///
    /// Closed-set parameters are already enforced at parse time by the typed
    /// schema; this checks the semantic invariants that span several keys.
    pub fn validate(&self) -> Result<()> {
        if self.scans.is_empty() {
            return Err(PostError::ConfigError(
                "scans must contain at least one scan number".to_string(),
            ));
        }

        self.check_per_scan_len("sample_name", self.sample_name.len())?;
        self.check_per_scan_len("save_dir", self.save_dir.len())?;
        self.check_per_scan_len("data_dir", self.data_dir.len())?;
        self.check_per_scan_len("specfile_name", self.specfile_name.len())?;
        self.check_per_scan_len("template_imagefile", self.template_imagefile.len())?;
        self.check_per_scan_len("reconstruction_files", self.reconstruction_files.len())?;

        for (name, binning) in [
            ("phasing_binning", &self.phasing_binning),
            ("preprocessing_binning", &self.preprocessing_binning),
        ] {
            if binning.iter().any(|&b| b == 0) {
                return Err(PostError::ConfigError(format!(
                    "{} factors must be >= 1, got {:?}",
                    name, binning
                )));
            }
        }

        if !(self.isosurface_strain > 0.0 && self.isosurface_strain < 1.0) {
            return Err(PostError::ConfigError(format!(
                "isosurface_strain must be in (0, 1), got {}",
                self.isosurface_strain
            )));
        }

        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(PostError::ConfigError(format!(
                "correlation_threshold must be in [0, 1], got {}",
                self.correlation_threshold
            )));
        }

        for (name, value) in [
            ("energy", self.energy),
            ("detector_distance", self.detector_distance),
            ("custom_pixelsize", self.custom_pixelsize),
        ] {
            if let Some(v) = value
                && v <= 0.0
            {
                return Err(PostError::ConfigError(format!(
                    "{} must be strictly positive, got {}",
                    name, v
                )));
            }
        }

        if self.threshold_gradient <= 0.0 {
            return Err(PostError::ConfigError(format!(
                "threshold_gradient must be strictly positive, got {}",
                self.threshold_gradient
            )));
        }

        if !(self.threshold_unwrap_refraction > 0.0 && self.threshold_unwrap_refraction < 1.0) {
            return Err(PostError::ConfigError(format!(
                "threshold_unwrap_refraction must be in (0, 1), got {}",
                self.threshold_unwrap_refraction
            )));
        }

        if let Some(roi) = self.roi_detector {
            if roi.iter().any(|&v| v < 0) {
                return Err(PostError::ConfigError(format!(
                    "roi_detector entries must be non-negative, got {:?}",
                    roi
                )));
            }
            if roi[0] >= roi[1] || roi[2] >= roi[3] {
                return Err(PostError::ConfigError(format!(
                    "roi_detector must be ordered [y0, y1, x0, x1] with y0 < y1 and x0 < x1, \
                     got {:?}",
                    roi
                )));
            }
        } else if self.center_roi_x.is_some() || self.center_roi_y.is_some() {
            // center_roi_x/center_roi_y only gate the meaning of roi_detector
            return Err(PostError::ConfigError(
                "center_roi_x/center_roi_y require roi_detector to be set".to_string(),
            ));
        }

        // Once the data is in the crystal frame, q is unknown and no further
        // frame change is possible.
        if self.data_frame == DataFrame::Crystal && self.save_frame != SaveFrame::Crystal {
            return Err(PostError::ConfigError(
                "data_frame 'crystal' requires save_frame 'crystal': the diffusion vector \
                 is unknown once the data is in the crystal frame"
                    .to_string(),
            ));
        }

        if self.data_frame == DataFrame::Detector
            && self.interpolation_method == InterpolationMethod::Xrayutilities
        {
            return Err(PostError::ConfigError(
                "interpolation_method 'xrayutilities' is not supported; \
                 use 'linearization'"
                    .to_string(),
            ));
        }

        if self.correct_refraction {
            match self.dispersion {
                None => {
                    return Err(PostError::ConfigError(
                        "correct_refraction is enabled but dispersion is not set".to_string(),
                    ));
                }
                Some(d) if d <= 0.0 => {
                    return Err(PostError::ConfigError(format!(
                        "dispersion must be strictly positive, got {}",
                        d
                    )));
                }
                _ => {}
            }
            if let Some(b) = self.absorption
                && b < 0.0
            {
                return Err(PostError::ConfigError(format!(
                    "absorption must be non-negative, got {}",
                    b
                )));
            }
        }

        if self.apodize {
            for (name, values) in [
                ("apodization_sigma", &self.apodization_sigma),
                ("apodization_alpha", &self.apodization_alpha),
            ] {
                if values.iter().any(|&v| v <= 0.0) {
                    return Err(PostError::ConfigError(format!(
                        "{} entries must be strictly positive, got {:?}",
                        name, values
                    )));
                }
            }
        }

        self.resolved_custom_motors()?;

        Ok(())
    }

    /// Resolve cross-references inside `custom_motors`.
    ///
    /// A bare identifier value refers to another top-level key; the resolved
    /// map contains only numeric entries. Referencing an unknown key, or a
    /// key whose value is unset, is an error.
    pub fn resolved_custom_motors(&self) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut resolved = BTreeMap::new();

        for (motor, value) in &self.custom_motors {
            let values = match value {
                MotorValue::Number(v) => vec![*v],
                MotorValue::Values(v) => v.clone(),
                MotorValue::Reference(key) => {
                    let target = match key.as_str() {
                        "inplane_angle" => self.inplane_angle,
                        "outofplane_angle" => self.outofplane_angle,
                        "tilt_angle" => self.tilt_angle,
                        "energy" => self.energy,
                        "detector_distance" => self.detector_distance,
                        _ => {
                            return Err(PostError::ConfigError(format!(
                                "custom_motors.{} references unknown key '{}'",
                                motor, key
                            )));
                        }
                    };
                    let v = target.ok_or_else(|| {
                        PostError::ConfigError(format!(
                            "custom_motors.{} references '{}', which is not set",
                            motor, key
                        ))
                    })?;
                    vec![v]
                }
            };
            resolved.insert(motor.clone(), values);
        }

        Ok(resolved)
    }

    /// Per-scan lookup in a list parameter: a single entry is shared by all
    /// scans, otherwise the entry at `scan_index` applies.
    pub fn per_scan<'a, T>(&self, values: &'a [T], scan_index: usize) -> Option<&'a T> {
        match values.len() {
            0 => None,
            1 => values.first(),
            _ => values.get(scan_index),
        }
    }

    fn check_per_scan_len(&self, name: &str, len: usize) -> Result<()> {
        if len > 1 && len != self.scans.len() {
            return Err(PostError::ConfigError(format!(
                "{} must have 1 entry or one entry per scan ({}), got {}",
                name,
                self.scans.len(),
                len
            )));
        }
        Ok(())
    }
}
