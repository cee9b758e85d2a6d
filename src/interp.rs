//! Real-space interpolation of 3-D volumes.
//!
//! Regridding and frame rotation both resample the input with trilinear
//! interpolation around the array center, in the z-y-x axis convention.
//! Positions outside the input volume read as zero.

use crate::error::{PostError, Result};
use nalgebra::{Rotation3, Unit, Vector3};
use ndarray::Array3;
use num_traits::Zero;
use std::ops::{Add, Mul};

/// Element types that can be interpolated (f64, Complex64).
pub trait Interpolable:
    Copy + Zero + Add<Output = Self> + Mul<f64, Output = Self>
{
}

impl<T> Interpolable for T where T: Copy + Zero + Add<Output = T> + Mul<f64, Output = T> {}

/// Trilinear sample at fractional voxel coordinates, zero outside.
fn trilinear<T: Interpolable>(data: &Array3<T>, z: f64, y: f64, x: f64) -> T {
    let (nz, ny, nx) = data.dim();
    let dims = [nz, ny, nx];
    let pos = [z, y, x];

    let mut base = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for axis in 0..3 {
        if pos[axis] < 0.0 || pos[axis] > (dims[axis] - 1) as f64 {
            return T::zero();
        }
        let floor = pos[axis].floor();
        base[axis] = floor as usize;
        frac[axis] = pos[axis] - floor;
    }

    let mut acc = T::zero();
    for dz in 0..2usize {
        for dy in 0..2usize {
            for dx in 0..2usize {
                let idx = [base[0] + dz, base[1] + dy, base[2] + dx];
                if idx[0] >= nz || idx[1] >= ny || idx[2] >= nx {
                    continue;
                }
                let weight = (if dz == 0 { 1.0 - frac[0] } else { frac[0] })
                    * (if dy == 0 { 1.0 - frac[1] } else { frac[1] })
                    * (if dx == 0 { 1.0 - frac[2] } else { frac[2] });
                acc = acc + data[(idx[0], idx[1], idx[2])] * weight;
            }
        }
    }
    acc
}

/// Resample a volume onto a grid with different voxel sizes.
///
/// The array shape is preserved; the physical field is stretched so that the
/// output voxels measure `target_nm`. The center voxel is the fixed point.
pub fn regrid<T: Interpolable>(
    data: &Array3<T>,
    current_nm: [f64; 3],
    target_nm: [f64; 3],
) -> Result<Array3<T>> {
    for (name, sizes) in [("current", &current_nm), ("target", &target_nm)] {
        if sizes.iter().any(|&v| v <= 0.0) {
            return Err(PostError::PipelineError(format!(
                "{} voxel sizes must be strictly positive, got {:?}",
                name, sizes
            )));
        }
    }
    if current_nm == target_nm {
        return Ok(data.clone());
    }

    let (nz, ny, nx) = data.dim();
    let center = [
        (nz - 1) as f64 / 2.0,
        (ny - 1) as f64 / 2.0,
        (nx - 1) as f64 / 2.0,
    ];
    let scale = [
        target_nm[0] / current_nm[0],
        target_nm[1] / current_nm[1],
        target_nm[2] / current_nm[2],
    ];

    Ok(Array3::from_shape_fn(data.dim(), |(i, j, k)| {
        let z = center[0] + (i as f64 - center[0]) * scale[0];
        let y = center[1] + (j as f64 - center[1]) * scale[1];
        let x = center[2] + (k as f64 - center[2]) * scale[2];
        trilinear(data, z, y, x)
    }))
}

/// Rotate a volume so that the direction `from` ends up along `to`.
///
/// Directions are laboratory-frame vectors in z-y-x component order. Voxel
/// sizes account for anisotropic grids; the array center is the rotation
/// center.
pub fn rotate_to_axis<T: Interpolable>(
    data: &Array3<T>,
    from: Vector3<f64>,
    to: Vector3<f64>,
    voxel_sizes_nm: [f64; 3],
) -> Result<Array3<T>> {
    if voxel_sizes_nm.iter().any(|&v| v <= 0.0) {
        return Err(PostError::PipelineError(format!(
            "voxel sizes must be strictly positive, got {:?}",
            voxel_sizes_nm
        )));
    }
    if from.norm() == 0.0 || to.norm() == 0.0 {
        return Err(PostError::PipelineError(
            "rotation directions must be non-zero".to_string(),
        ));
    }

    let rotation = match Rotation3::rotation_between(&from, &to) {
        Some(r) => r,
        // Anti-parallel vectors: rotate by pi around any perpendicular axis.
        None => {
            let axis = perpendicular(&from.normalize());
            Rotation3::from_axis_angle(&Unit::new_normalize(axis), std::f64::consts::PI)
        }
    };
    let inverse = rotation.inverse();

    let (nz, ny, nx) = data.dim();
    let center = [
        (nz - 1) as f64 / 2.0,
        (ny - 1) as f64 / 2.0,
        (nx - 1) as f64 / 2.0,
    ];

    Ok(Array3::from_shape_fn(data.dim(), |(i, j, k)| {
        let physical = Vector3::new(
            (i as f64 - center[0]) * voxel_sizes_nm[0],
            (j as f64 - center[1]) * voxel_sizes_nm[1],
            (k as f64 - center[2]) * voxel_sizes_nm[2],
        );
        let source = inverse * physical;
        trilinear(
            data,
            center[0] + source[0] / voxel_sizes_nm[0],
            center[1] + source[1] / voxel_sizes_nm[1],
            center[2] + source[2] / voxel_sizes_nm[2],
        )
    }))
}

fn perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let candidate = if v[0].abs() < 0.9 {
        Vector3::new(1.0, 0.0, 0.0)
    } else {
        Vector3::new(0.0, 1.0, 0.0)
    };
    v.cross(&candidate)
}
