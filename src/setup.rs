//! Experiment geometry derived from the validated configuration.
//!
//! The laboratory frame convention is z downstream, y vertical up, x outboard;
//! arrays are indexed in the same z-y-x order. All direct-space lengths are
//! expressed in nm, detector quantities in m, angles in degrees unless noted.

use crate::config::Config;
use crate::error::{PostError, Result};
use nalgebra::Vector3;

/// Conversion constant: wavelength(nm) = HC_EV_NM / energy(eV).
const HC_EV_NM: f64 = 1239.841984;

/// Geometry of one scan, snapshotted from the configuration.
///
/// Unlike the configuration record, the setup is mutable during the run:
/// detector angles missing from the parameter file can be corrected from the
/// Bragg peak position.
#[derive(Debug, Clone)]
pub struct Setup {
    /// X-ray energy in eV.
    pub energy: Option<f64>,

    /// Sample to detector distance in m.
    pub distance: Option<f64>,

    /// Detector out-of-plane angle in degrees.
    pub outofplane_angle: Option<f64>,

    /// Detector in-plane angle in degrees.
    pub inplane_angle: Option<f64>,

    /// Angular step of the rocking curve in degrees.
    pub tilt_angle: Option<f64>,

    /// Detector pixel size (vertical, horizontal) in m.
    pub pixel_size: [f64; 2],

    /// Direct beam position [vertical, horizontal] on the unbinned detector.
    pub direct_beam: Option<[f64; 2]>,

    /// Detector angles [outofplane, inplane] of the direct beam measurement.
    pub dirbeam_detector_angles: Option<[f64; 2]>,

    /// Binning applied during phasing (stacking, vertical, horizontal).
    pub binning: [usize; 3],

    /// Binning applied during pre-processing.
    pub preprocessing_binning: [usize; 3],
}

impl Setup {
    /// Snapshot the geometry for one scan from the validated configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            energy: config.energy,
            distance: config.detector_distance,
            outofplane_angle: config.outofplane_angle,
            inplane_angle: config.inplane_angle,
            tilt_angle: config.tilt_angle,
            pixel_size: detector_pixel_size(&config.detector, config.custom_pixelsize),
            direct_beam: config.direct_beam,
            dirbeam_detector_angles: config.dirbeam_detector_angles,
            binning: config.phasing_binning,
            preprocessing_binning: config.preprocessing_binning,
        }
    }

    /// Wavelength in nm.
    pub fn wavelength_nm(&self) -> Result<f64> {
        let energy = self
            .energy
            .ok_or_else(|| PostError::PipelineError("energy is not defined".to_string()))?;
        Ok(HC_EV_NM / energy)
    }

    /// Momentum transfer vector in the laboratory frame (z, y, x), in 1/nm.
    ///
    /// q = k_out - k_in with |k| = 2*pi/lambda, the incident beam along +z.
    pub fn q_laboratory(&self) -> Result<Vector3<f64>> {
        let wavelength = self.wavelength_nm()?;
        let outofplane = self.require_angle(self.outofplane_angle, "outofplane_angle")?;
        let inplane = self.require_angle(self.inplane_angle, "inplane_angle")?;

        let k = 2.0 * std::f64::consts::PI / wavelength;
        let delta = outofplane.to_radians();
        let gamma = inplane.to_radians();

        // k_out in z-y-x order
        let kout = Vector3::new(
            k * delta.cos() * gamma.cos(),
            k * delta.sin(),
            k * delta.cos() * gamma.sin(),
        );
        let kin = Vector3::new(k, 0.0, 0.0);
        Ok(kout - kin)
    }

    /// Norm of the momentum transfer in 1/nm.
    pub fn q_norm(&self) -> Result<f64> {
        Ok(self.q_laboratory()?.norm())
    }

    /// Normalized momentum transfer direction in the laboratory frame.
    pub fn q_direction(&self) -> Result<Vector3<f64>> {
        let q = self.q_laboratory()?;
        let norm = q.norm();
        if norm == 0.0 {
            return Err(PostError::PipelineError(
                "momentum transfer is zero, check the detector angles".to_string(),
            ));
        }
        Ok(q / norm)
    }

    /// Interplanar distance 2*pi/|q| in nm.
    pub fn interplanar_distance(&self) -> Result<f64> {
        Ok(2.0 * std::f64::consts::PI / self.q_norm()?)
    }

    /// Whether detector angles must be recovered from the Bragg peak.
    pub fn angles_correction_needed(&self) -> bool {
        self.outofplane_angle.is_none() || self.inplane_angle.is_none()
    }

    /// Correct the detector angles from the Bragg peak position.
    ///
    /// The peak position [z, y, x] is expressed on the unbinned detector.
    /// Requires the direct beam position and the detector angles at which it
    /// was measured.
    pub fn correct_detector_angles(&mut self, bragg_peak: [f64; 3]) -> Result<()> {
        let distance = self
            .distance
            .ok_or_else(|| PostError::PipelineError("detector_distance is not defined".to_string()))?;
        let direct_beam = self.direct_beam.ok_or_else(|| {
            PostError::PipelineError(
                "direct_beam is required to correct the detector angles".to_string(),
            )
        })?;
        let dirbeam_angles = self.dirbeam_detector_angles.ok_or_else(|| {
            PostError::PipelineError(
                "dirbeam_detector_angles is required to correct the detector angles".to_string(),
            )
        })?;

        // Vertical axis points up while detector rows increase downward.
        let outofplane = dirbeam_angles[0]
            + ((direct_beam[0] - bragg_peak[1]) * self.pixel_size[0] / distance)
                .atan()
                .to_degrees();
        let inplane = dirbeam_angles[1]
            + ((bragg_peak[2] - direct_beam[1]) * self.pixel_size[1] / distance)
                .atan()
                .to_degrees();

        self.outofplane_angle = Some(outofplane);
        self.inplane_angle = Some(inplane);
        Ok(())
    }

    /// Direct-space voxel sizes (z, y, x) in nm for a detector-frame array.
    ///
    /// Detector axes sample at lambda*D/(n*p); the rocking axis samples at
    /// lambda/(n*dtheta).
    pub fn voxel_sizes_detector(&self, shape: [usize; 3]) -> Result<[f64; 3]> {
        let wavelength = self.wavelength_nm()?;
        let distance = self
            .distance
            .ok_or_else(|| PostError::PipelineError("detector_distance is not defined".to_string()))?;
        let tilt = self
            .tilt_angle
            .ok_or_else(|| PostError::PipelineError("tilt_angle is not defined".to_string()))?;
        if tilt == 0.0 {
            return Err(PostError::PipelineError(
                "tilt_angle must be non-zero to compute the rocking voxel size".to_string(),
            ));
        }

        let effective_tilt =
            tilt.abs() * (self.preprocessing_binning[0] * self.binning[0]) as f64;
        let voxel_z = wavelength / (shape[0] as f64 * effective_tilt.to_radians());
        let voxel_y = wavelength * distance / (shape[1] as f64 * self.pixel_size[0]);
        let voxel_x = wavelength * distance / (shape[2] as f64 * self.pixel_size[1]);
        Ok([voxel_z, voxel_y, voxel_x])
    }

    fn require_angle(&self, angle: Option<f64>, name: &str) -> Result<f64> {
        angle.ok_or_else(|| {
            PostError::PipelineError(format!(
                "{} is not defined; correct the detector angles from the Bragg peak first",
                name
            ))
        })
    }
}

/// Pixel size (vertical, horizontal) in m for a known detector name.
///
/// An override from the configuration takes precedence; unknown detectors
/// fall back to 55 um pixels.
fn detector_pixel_size(detector: &str, custom_pixelsize: Option<f64>) -> [f64; 2] {
    if let Some(p) = custom_pixelsize {
        return [p, p];
    }
    match detector {
        "Eiger2M" | "Eiger4M" => [75e-6, 75e-6],
        "Timepix" | "Merlin" | "Maxipix" | "Dummy" => [55e-6, 55e-6],
        _ => [55e-6, 55e-6],
    }
}

/// Direct-space voxel sizes (z, y, x) in nm from q-value extents in 1/A.
///
/// In the nexus convention qx is the downstream axis, qz vertical up and qy
/// outboard; each real-space sampling is 2*pi over the q range, converted
/// from A to nm.
pub fn voxel_sizes_from_q_extents(
    qx_extent: f64,
    qz_extent: f64,
    qy_extent: f64,
) -> Result<[f64; 3]> {
    for (name, extent) in [("qx", qx_extent), ("qz", qz_extent), ("qy", qy_extent)] {
        if extent <= 0.0 {
            return Err(PostError::PipelineError(format!(
                "{} extent must be strictly positive, got {}",
                name, extent
            )));
        }
    }
    let two_pi = 2.0 * std::f64::consts::PI;
    Ok([
        two_pi / qx_extent / 10.0,
        two_pi / qz_extent / 10.0,
        two_pi / qy_extent / 10.0,
    ])
}
