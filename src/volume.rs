//! 3-D volume utilities shared by the pipeline stages.
//!
//! Volumes are indexed in z-y-x order (z downstream, y vertical up,
//! x outboard). The complex reconstruction is carried as `Array3<Complex64>`;
//! modulus and phase views are plain `Array3<f64>`.

use crate::config::DirectSpaceCentering;
use crate::error::{PostError, Result};
use ndarray::{Array3, Axis, Zip, s};
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Complex reconstruction volume.
pub type ComplexVolume = Array3<Complex64>;

/// Modulus of a complex volume.
pub fn modulus(data: &ComplexVolume) -> Array3<f64> {
    data.mapv(|c| c.norm())
}

/// Phase of a complex volume, wrapped in [-pi, pi).
pub fn phase(data: &ComplexVolume) -> Array3<f64> {
    data.mapv(|c| c.arg())
}

/// Recombine modulus and phase into a complex volume.
///
/// The phase is effectively rewrapped through the complex exponential.
pub fn from_modulus_phase(modulus: &Array3<f64>, phase: &Array3<f64>) -> Result<ComplexVolume> {
    if modulus.dim() != phase.dim() {
        return Err(PostError::PipelineError(format!(
            "modulus shape {:?} does not match phase shape {:?}",
            modulus.dim(),
            phase.dim()
        )));
    }
    let mut out = Array3::zeros(modulus.dim());
    Zip::from(&mut out)
        .and(modulus)
        .and(phase)
        .for_each(|o, &m, &p| *o = Complex64::from_polar(m, p));
    Ok(out)
}

/// Crop or zero-pad a volume to the target shape, keeping it centered.
pub fn crop_pad(data: &ComplexVolume, target: [usize; 3]) -> Result<ComplexVolume> {
    if target.iter().any(|&n| n == 0) {
        return Err(PostError::PipelineError(format!(
            "crop/pad target shape must be non-zero, got {:?}",
            target
        )));
    }

    let (nz, ny, nx) = data.dim();
    let source = [nz, ny, nx];
    let mut out = Array3::zeros((target[0], target[1], target[2]));

    // Overlapping range per axis, centered in both arrays.
    let mut src_start = [0usize; 3];
    let mut dst_start = [0usize; 3];
    let mut length = [0usize; 3];
    for axis in 0..3 {
        let n = source[axis].min(target[axis]);
        src_start[axis] = (source[axis] - n) / 2;
        dst_start[axis] = (target[axis] - n) / 2;
        length[axis] = n;
    }

    let src = data.slice(s![
        src_start[0]..src_start[0] + length[0],
        src_start[1]..src_start[1] + length[1],
        src_start[2]..src_start[2] + length[2]
    ]);
    out.slice_mut(s![
        dst_start[0]..dst_start[0] + length[0],
        dst_start[1]..dst_start[1] + length[1],
        dst_start[2]..dst_start[2] + length[2]
    ])
    .assign(&src);

    Ok(out)
}

/// Mirror the twin image: reverse all axes and conjugate.
pub fn flip(data: &ComplexVolume) -> ComplexVolume {
    let (nz, ny, nx) = data.dim();
    Array3::from_shape_fn(data.dim(), |(i, j, k)| {
        data[(nz - 1 - i, ny - 1 - j, nx - 1 - k)].conj()
    })
}

/// FFT direction for [`fft3`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum FftDirection {
    Forward,
    Inverse,
}

/// Unnormalized 3-D FFT, applied as 1-D transforms along each axis.
pub(crate) fn fft3(data: &ComplexVolume, direction: FftDirection) -> ComplexVolume {
    let mut planner = FftPlanner::new();
    let mut out = data.clone();
    for axis in 0..3 {
        let n = out.shape()[axis];
        let fft = match direction {
            FftDirection::Forward => planner.plan_fft_forward(n),
            FftDirection::Inverse => planner.plan_fft_inverse(n),
        };
        let mut buffer: Vec<Complex64> = Vec::with_capacity(n);
        for mut lane in out.lanes_mut(Axis(axis)) {
            buffer.clear();
            buffer.extend(lane.iter().cloned());
            fft.process(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(&buffer) {
                *dst = *src;
            }
        }
    }
    out
}

/// Circularly roll a volume by the given shifts (one per axis).
pub fn roll(data: &ComplexVolume, shifts: [i64; 3]) -> ComplexVolume {
    let (nz, ny, nx) = data.dim();
    let dims = [nz as i64, ny as i64, nx as i64];
    Array3::from_shape_fn(data.dim(), |(i, j, k)| {
        let src = [
            (i as i64 - shifts[0]).rem_euclid(dims[0]) as usize,
            (j as i64 - shifts[1]).rem_euclid(dims[1]) as usize,
            (k as i64 - shifts[2]).rem_euclid(dims[2]) as usize,
        ];
        data[(src[0], src[1], src[2])]
    })
}

/// Index of the maximum of a real volume.
pub fn argmax(values: &Array3<f64>) -> [usize; 3] {
    let mut best = [0usize; 3];
    let mut best_value = f64::NEG_INFINITY;
    for ((i, j, k), &v) in values.indexed_iter() {
        if v > best_value {
            best_value = v;
            best = [i, j, k];
        }
    }
    best
}

/// Center of mass of a real volume.
pub fn center_of_mass(values: &Array3<f64>) -> Result<[f64; 3]> {
    let total: f64 = values.sum();
    if total == 0.0 {
        return Err(PostError::PipelineError(
            "center of mass is undefined for an empty volume".to_string(),
        ));
    }
    let mut com = [0.0f64; 3];
    for ((i, j, k), &v) in values.indexed_iter() {
        com[0] += i as f64 * v;
        com[1] += j as f64 * v;
        com[2] += k as f64 * v;
    }
    Ok([com[0] / total, com[1] / total, com[2] / total])
}

/// Center the object in the array based on its modulus.
///
/// `max_com` first rolls the maximum to the center, then refines with the
/// center of mass, matching the usual behavior for noisy reconstructions.
pub fn center_object(
    data: &ComplexVolume,
    method: DirectSpaceCentering,
) -> Result<ComplexVolume> {
    if method == DirectSpaceCentering::Skip {
        return Ok(data.clone());
    }

    let (nz, ny, nx) = data.dim();
    let center = [nz as f64 / 2.0, ny as f64 / 2.0, nx as f64 / 2.0];
    let amp = modulus(data);

    let shift_from = |position: [f64; 3]| -> [i64; 3] {
        [
            (center[0] - position[0]).round() as i64,
            (center[1] - position[1]).round() as i64,
            (center[2] - position[2]).round() as i64,
        ]
    };

    let rolled = match method {
        DirectSpaceCentering::Max => {
            let peak = argmax(&amp);
            roll(data, shift_from([peak[0] as f64, peak[1] as f64, peak[2] as f64]))
        }
        DirectSpaceCentering::Com => roll(data, shift_from(center_of_mass(&amp)?)),
        DirectSpaceCentering::MaxCom => {
            let peak = argmax(&amp);
            let coarse = roll(
                data,
                shift_from([peak[0] as f64, peak[1] as f64, peak[2] as f64]),
            );
            let refined = center_of_mass(&modulus(&coarse))?;
            roll(&coarse, shift_from(refined))
        }
        DirectSpaceCentering::Skip => unreachable!(),
    };
    Ok(rolled)
}

/// Shape of the tight, centered box containing the modulus above an
/// amplitude threshold.
///
/// The box is symmetric around the array center, grown by `margin` voxels,
/// rounded up to even sizes and clipped to the array shape. `keep_size`
/// bypasses the search and returns the current shape.
pub fn find_datarange(
    modulus: &Array3<f64>,
    amplitude_threshold: f64,
    margin: usize,
    keep_size: bool,
) -> Result<[usize; 3]> {
    let (nz, ny, nx) = modulus.dim();
    let shape = [nz, ny, nx];
    if keep_size {
        return Ok(shape);
    }

    let max = modulus.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Err(PostError::PipelineError(
            "cannot find the data range of an empty modulus".to_string(),
        ));
    }
    let threshold = amplitude_threshold * max;

    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    for ((i, j, k), &v) in modulus.indexed_iter() {
        if v > threshold {
            let idx = [i, j, k];
            for axis in 0..3 {
                lo[axis] = lo[axis].min(idx[axis]);
                hi[axis] = hi[axis].max(idx[axis]);
            }
        }
    }
    if lo[0] == usize::MAX {
        return Err(PostError::PipelineError(format!(
            "no voxel above the amplitude threshold {}",
            amplitude_threshold
        )));
    }

    let mut result = [0usize; 3];
    for axis in 0..3 {
        let center = shape[axis] / 2;
        let below = center.saturating_sub(lo[axis]);
        let above = (hi[axis] + 1).saturating_sub(center);
        let half = below.max(above) + margin;
        let size = (2 * half).next_multiple_of(2).max(2);
        result[axis] = size.min(shape[axis]);
    }
    Ok(result)
}

/// Binary support from the normalized modulus: 1 where the modulus exceeds
/// `threshold * max`, 0 elsewhere.
pub fn support_from_modulus(modulus: &Array3<f64>, threshold: f64) -> Array3<f64> {
    let max = modulus.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Array3::zeros(modulus.dim());
    }
    modulus.mapv(|v| if v > threshold * max { 1.0 } else { 0.0 })
}

/// Wrap a value into [start_angle, start_angle + range).
pub fn wrap_value(value: f64, start_angle: f64, range: f64) -> f64 {
    start_angle + (value - start_angle).rem_euclid(range)
}

/// Wrap all phase values into [start_angle, start_angle + range).
pub fn wrap(values: &Array3<f64>, start_angle: f64, range: f64) -> Array3<f64> {
    values.mapv(|v| wrap_value(v, start_angle, range))
}
