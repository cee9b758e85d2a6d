//! Phase manipulation on a complex reconstruction.
//!
//! The [`PhaseManipulator`] owns the modulus/phase split of the object and
//! applies unwrapping, ramp removal, offset removal, averaging and
//! apodization in place. The complex volume is recombined only when the
//! caller asks for it, so the unwrapped phase is not destroyed by
//! intermediate round trips.

use crate::config::{ApodizationWindow, OffsetMethod};
use crate::error::{PostError, Result};
use crate::volume::{self, ComplexVolume, FftDirection, fft3};
use ndarray::{Array1, Array3, Axis, Zip};
use std::f64::consts::PI;

// =============================================================================
// PhaseManipulator
// =============================================================================

/// Modulus/phase view of a complex object with in-place phase operations.
pub struct PhaseManipulator {
    modulus: Array3<f64>,
    phase: Array3<f64>,
    /// Phase extent over the support, recorded during unwrapping.
    extent_phase: Option<f64>,
    /// Mean phase gradient per axis, recorded by [`Self::remove_ramp`].
    phase_ramp: Option<[f64; 3]>,
}

impl PhaseManipulator {
    /// Split a complex volume into its modulus and wrapped phase.
    pub fn new(data: &ComplexVolume) -> Self {
        Self {
            modulus: volume::modulus(data),
            phase: volume::phase(data),
            extent_phase: None,
            phase_ramp: None,
        }
    }

    pub fn modulus(&self) -> &Array3<f64> {
        &self.modulus
    }

    pub fn phase(&self) -> &Array3<f64> {
        &self.phase
    }

    pub fn extent_phase(&self) -> Option<f64> {
        self.extent_phase
    }

    pub fn phase_ramp(&self) -> Option<[f64; 3]> {
        self.phase_ramp
    }

    /// Mutable access to modulus and phase for corrections applied outside
    /// this type (refraction, absorption).
    pub fn parts_mut(&mut self) -> (&mut Array3<f64>, &mut Array3<f64>) {
        (&mut self.modulus, &mut self.phase)
    }

    /// Recombine modulus and phase into a complex volume.
    pub fn to_complex(&self) -> Result<ComplexVolume> {
        volume::from_modulus_phase(&self.modulus, &self.phase)
    }

    /// Unwrap the phase axis by axis and record its extent over the support.
    ///
    /// Each 1-D lane is unwrapped independently, sequentially along z, y and
    /// x. Only support voxels (normalized modulus above `support_threshold`)
    /// take part: the meaningless vacuum phase neither receives corrections
    /// nor seeds jumps across the object boundary. The extent is the
    /// peak-to-peak phase over the support, rounded up to a whole radian.
    pub fn unwrap_phase(&mut self, support_threshold: f64) {
        let support = volume::support_from_modulus(&self.modulus, support_threshold);
        for axis in 0..3 {
            unwrap_along_axis(&mut self.phase, &support, Axis(axis));
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        Zip::from(&self.phase).and(&support).for_each(|&p, &s| {
            if s > 0.0 {
                min = min.min(p);
                max = max.max(p);
            }
        });
        self.extent_phase = if max >= min {
            Some((max - min).ceil())
        } else {
            Some(0.0)
        };
    }

    /// Remove the mean linear phase ramp and remember it.
    ///
    /// The ramp is the per-axis mean of the phase gradient, averaged over
    /// support voxels (normalized modulus above `support_threshold`) whose
    /// gradient magnitude stays below `threshold_gradient`. The support
    /// restriction keeps the flat vacuum phase out of the estimate, the
    /// gradient restriction keeps out phase wraps and defects.
    pub fn remove_ramp(
        &mut self,
        threshold_gradient: f64,
        support_threshold: f64,
    ) -> Result<()> {
        let support = volume::support_from_modulus(&self.modulus, support_threshold);
        let mut ramp = [0.0f64; 3];
        for axis in 0..3 {
            let grad = gradient(&self.phase, axis);
            let mut sum = 0.0;
            let mut count = 0usize;
            Zip::from(&grad).and(&support).for_each(|&g, &s| {
                if s > 0.0 && g.abs() < threshold_gradient {
                    sum += g;
                    count += 1;
                }
            });
            if count == 0 {
                return Err(PostError::PipelineError(format!(
                    "no support voxel with phase gradient below {} along axis {}",
                    threshold_gradient, axis
                )));
            }
            ramp[axis] = sum / count as f64;
        }

        self.apply_ramp(ramp, -1.0);
        self.phase_ramp = Some(ramp);
        Ok(())
    }

    /// Re-apply the stored ramp with the given sign (+1 restores it, -1
    /// removes it again).
    pub fn add_ramp(&mut self, sign: f64) -> Result<()> {
        let ramp = self.phase_ramp.ok_or_else(|| {
            PostError::PipelineError("no phase ramp recorded, call remove_ramp first".to_string())
        })?;
        self.apply_ramp(ramp, sign);
        Ok(())
    }

    /// Wrap the phase into a symmetric interval of the recorded extent.
    pub fn center_phase(&mut self) -> Result<()> {
        let extent = self.extent_phase.ok_or_else(|| {
            PostError::PipelineError(
                "phase extent unknown, call unwrap_phase first".to_string(),
            )
        })?;
        if extent > 0.0 {
            self.phase = volume::wrap(&self.phase, -extent / 2.0, extent);
        }
        Ok(())
    }

    /// Shift the phase so that its reference value over the support equals
    /// `phase_offset`.
    ///
    /// With an `origin` the reference is the phase at that voxel; otherwise
    /// it is the plain or modulus-weighted mean over the support, depending
    /// on `method`.
    pub fn remove_offset(
        &mut self,
        method: OffsetMethod,
        support_threshold: f64,
        phase_offset: f64,
        origin: Option<[f64; 3]>,
    ) -> Result<()> {
        let reference = match origin {
            Some(origin) => {
                let (nz, ny, nx) = self.phase.dim();
                let idx = [
                    origin[0].round() as isize,
                    origin[1].round() as isize,
                    origin[2].round() as isize,
                ];
                if idx[0] < 0
                    || idx[1] < 0
                    || idx[2] < 0
                    || idx[0] as usize >= nz
                    || idx[1] as usize >= ny
                    || idx[2] as usize >= nx
                {
                    return Err(PostError::PipelineError(format!(
                        "phase_offset_origin {:?} is outside the volume {:?}",
                        origin,
                        (nz, ny, nx)
                    )));
                }
                self.phase[(idx[0] as usize, idx[1] as usize, idx[2] as usize)]
            }
            None => {
                let support = volume::support_from_modulus(&self.modulus, support_threshold);
                let mut weighted = 0.0;
                let mut weight = 0.0;
                Zip::from(&self.phase)
                    .and(&support)
                    .and(&self.modulus)
                    .for_each(|&p, &s, &m| {
                        if s > 0.0 {
                            let w = match method {
                                OffsetMethod::Mean => 1.0,
                                OffsetMethod::Com => m,
                            };
                            weighted += w * p;
                            weight += w;
                        }
                    });
                if weight == 0.0 {
                    return Err(PostError::PipelineError(
                        "empty support, cannot evaluate the phase offset".to_string(),
                    ));
                }
                weighted / weight
            }
        };

        let shift = reference - phase_offset;
        self.phase.mapv_inplace(|p| p - shift);
        Ok(())
    }

    /// Mean-filter the phase inside the support.
    ///
    /// Each support voxel is replaced by the average phase over the
    /// `(2 * half_width + 1)^3` neighborhood restricted to the support.
    /// A half-width of 0 is a no-op.
    pub fn average_phase(&mut self, half_width: u32, support_threshold: f64) {
        if half_width == 0 {
            return;
        }
        let w = half_width as isize;
        let support = volume::support_from_modulus(&self.modulus, support_threshold);
        let (nz, ny, nx) = self.phase.dim();
        let source = self.phase.clone();

        for ((i, j, k), out) in self.phase.indexed_iter_mut() {
            if support[(i, j, k)] == 0.0 {
                continue;
            }
            let mut sum = 0.0;
            let mut count = 0usize;
            for di in -w..=w {
                for dj in -w..=w {
                    for dk in -w..=w {
                        let z = i as isize + di;
                        let y = j as isize + dj;
                        let x = k as isize + dk;
                        if z < 0 || y < 0 || x < 0 {
                            continue;
                        }
                        let (z, y, x) = (z as usize, y as usize, x as usize);
                        if z >= nz || y >= ny || x >= nx {
                            continue;
                        }
                        if support[(z, y, x)] > 0.0 {
                            sum += source[(z, y, x)];
                            count += 1;
                        }
                    }
                }
            }
            if count > 0 {
                *out = sum / count as f64;
            }
        }
    }

    /// Negate the phase (toward the electric field convention).
    pub fn invert_phase(&mut self) {
        self.phase.mapv_inplace(|p| -p);
    }

    /// Apodize the object by windowing its Fourier transform.
    ///
    /// The modulus maximum is preserved so the isosurface threshold keeps its
    /// meaning downstream.
    pub fn apodize(
        &mut self,
        window: ApodizationWindow,
        sigma: [f64; 3],
        mu: [f64; 3],
        alpha: [f64; 3],
    ) -> Result<()> {
        let original_max = self
            .modulus
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if !(original_max > 0.0) {
            return Err(PostError::PipelineError(
                "cannot apodize an empty object".to_string(),
            ));
        }

        let data = self.to_complex()?;
        let (nz, ny, nx) = data.dim();
        let shape = [nz, ny, nx];

        let mut spectrum = fft3(&data, FftDirection::Forward);

        // The window is built centered, the spectrum is not; shift the
        // spectrum to the center, window it, shift back.
        let half = [
            shape[0] as i64 / 2,
            shape[1] as i64 / 2,
            shape[2] as i64 / 2,
        ];
        spectrum = volume::roll(&spectrum, half);

        let windows: Vec<Array1<f64>> = (0..3)
            .map(|axis| window_1d(window, shape[axis], sigma[axis], mu[axis], alpha[axis]))
            .collect();
        for ((i, j, k), v) in spectrum.indexed_iter_mut() {
            *v *= windows[0][i] * windows[1][j] * windows[2][k];
        }

        spectrum = volume::roll(&spectrum, [-half[0], -half[1], -half[2]]);
        let mut result = fft3(&spectrum, FftDirection::Inverse);

        let n = (nz * ny * nx) as f64;
        result.mapv_inplace(|v| v / n);

        let mut new_modulus = volume::modulus(&result);
        let new_max = new_modulus
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if new_max > 0.0 {
            let scale = original_max / new_max;
            new_modulus.mapv_inplace(|v| v * scale);
        }

        self.modulus = new_modulus;
        self.phase = volume::phase(&result);
        Ok(())
    }

    fn apply_ramp(&mut self, ramp: [f64; 3], sign: f64) {
        let (nz, ny, nx) = self.phase.dim();
        let center = [nz as f64 / 2.0, ny as f64 / 2.0, nx as f64 / 2.0];
        for ((i, j, k), p) in self.phase.indexed_iter_mut() {
            let linear = ramp[0] * (i as f64 - center[0])
                + ramp[1] * (j as f64 - center[1])
                + ramp[2] * (k as f64 - center[2]);
            *p += sign * linear;
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Phase gradient along one axis with unit voxel spacing.
///
/// Central differences in the interior, one-sided at the edges.
pub fn gradient(values: &Array3<f64>, axis: usize) -> Array3<f64> {
    let (nz, ny, nx) = values.dim();
    let dims = [nz, ny, nx];
    let n = dims[axis];
    Array3::from_shape_fn(values.dim(), |(i, j, k)| {
        let idx = [i, j, k];
        let pos = idx[axis];
        let at = |p: usize| {
            let mut q = idx;
            q[axis] = p;
            values[(q[0], q[1], q[2])]
        };
        if n < 2 {
            0.0
        } else if pos == 0 {
            at(1) - at(0)
        } else if pos == n - 1 {
            at(n - 1) - at(n - 2)
        } else {
            (at(pos + 1) - at(pos - 1)) / 2.0
        }
    })
}

fn unwrap_along_axis(phase: &mut Array3<f64>, support: &Array3<f64>, axis: Axis) {
    for (mut lane, mask) in phase
        .lanes_mut(axis)
        .into_iter()
        .zip(support.lanes(axis))
    {
        let mut correction = 0.0;
        let mut previous: Option<f64> = None;
        for (v, &s) in lane.iter_mut().zip(mask.iter()) {
            if s == 0.0 {
                continue;
            }
            let raw = *v;
            if let Some(prev) = previous {
                let diff = raw - prev;
                // A gap in the support can span several wraps at once.
                if diff.abs() > PI {
                    correction -= (diff / (2.0 * PI)).round() * 2.0 * PI;
                }
            }
            *v = raw + correction;
            previous = Some(raw);
        }
    }
}

/// Centered 1-D apodization window of length `n`.
///
/// The coordinate runs over [-0.5, 0.5]; `mu` shifts the normal window,
/// `alpha` sets the Tukey taper fraction.
fn window_1d(
    window: ApodizationWindow,
    n: usize,
    sigma: f64,
    mu: f64,
    alpha: f64,
) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| {
        if n < 2 {
            return 1.0;
        }
        let t = i as f64 / (n - 1) as f64;
        match window {
            ApodizationWindow::Blackman => {
                0.42 - 0.5 * (2.0 * PI * t).cos() + 0.08 * (4.0 * PI * t).cos()
            }
            ApodizationWindow::Tukey => {
                let a = alpha.clamp(0.0, 1.0);
                if a == 0.0 {
                    1.0
                } else if t < a / 2.0 {
                    0.5 * (1.0 + (PI * (2.0 * t / a - 1.0)).cos())
                } else if t > 1.0 - a / 2.0 {
                    0.5 * (1.0 + (PI * (2.0 * (1.0 - t) / a - 1.0)).cos())
                } else {
                    1.0
                }
            }
            ApodizationWindow::Normal => {
                let x = t - 0.5 - mu;
                (-x * x / (2.0 * sigma * sigma)).exp()
            }
        }
    })
}
