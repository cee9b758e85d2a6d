//! Strain computation and refraction correction.
//!
//! The heterogeneous strain is the spatial derivative of the displacement
//! projected on the diffusion vector: with the phase in radians and q in
//! 1/nm, `strain = dphi/dr / |q|` along the reference axis. Voxel sizes are
//! in nanometers.

use crate::config::{OpticalPathMethod, RefAxis, StrainMethod};
use crate::error::{PostError, Result};
use crate::phase::gradient;
use ndarray::{Array3, Zip};
use std::f64::consts::PI;

/// Strain field from the unwrapped phase.
///
/// The strain is zero outside the support. With [`StrainMethod::Defect`] the
/// one-voxel surface shell is also zeroed, so that the wrap-prone values at a
/// defect outcrop do not pollute the bulk statistics.
pub fn compute_strain(
    phase: &Array3<f64>,
    support: &Array3<f64>,
    voxel_sizes_nm: [f64; 3],
    ref_axis: RefAxis,
    q_norm: f64,
    method: StrainMethod,
) -> Result<Array3<f64>> {
    if phase.dim() != support.dim() {
        return Err(PostError::PipelineError(format!(
            "phase shape {:?} does not match support shape {:?}",
            phase.dim(),
            support.dim()
        )));
    }
    if !(q_norm > 0.0) {
        return Err(PostError::PipelineError(format!(
            "strain needs a strictly positive |q|, got {}",
            q_norm
        )));
    }
    if voxel_sizes_nm.iter().any(|&v| v <= 0.0) {
        return Err(PostError::PipelineError(format!(
            "voxel sizes must be strictly positive, got {:?}",
            voxel_sizes_nm
        )));
    }

    let axis = ref_axis.array_axis();
    let grad = gradient(phase, axis);

    let mask = match method {
        StrainMethod::Default => support.clone(),
        StrainMethod::Defect => erode_support(support),
    };

    let mut strain = Array3::zeros(phase.dim());
    Zip::from(&mut strain)
        .and(&grad)
        .and(&mask)
        .for_each(|s, &g, &m| {
            if m > 0.0 {
                *s = g / voxel_sizes_nm[axis] / q_norm;
            }
        });
    Ok(strain)
}

/// Erode a binary support with the 6-connected structuring element.
pub fn erode_support(support: &Array3<f64>) -> Array3<f64> {
    let (nz, ny, nx) = support.dim();
    Array3::from_shape_fn(support.dim(), |(i, j, k)| {
        if support[(i, j, k)] == 0.0 {
            return 0.0;
        }
        let neighbors = [
            (i.wrapping_sub(1), j, k),
            (i + 1, j, k),
            (i, j.wrapping_sub(1), k),
            (i, j + 1, k),
            (i, j, k.wrapping_sub(1)),
            (i, j, k + 1),
        ];
        for (z, y, x) in neighbors {
            if z >= nz || y >= ny || x >= nx || support[(z, y, x)] == 0.0 {
                return 0.0;
            }
        }
        1.0
    })
}

/// Optical path in nanometers traversed inside the crystal to reach each
/// voxel, along the incoming beam.
///
/// The path is accumulated along the array axis closest to `beam_direction`.
/// [`OpticalPathMethod::Defect`] additionally counts voxels in holes of the
/// support that are enclosed by crystal along that axis, so a void defect
/// does not truncate the path behind it.
pub fn optical_path(
    support: &Array3<f64>,
    beam_direction: [f64; 3],
    voxel_sizes_nm: [f64; 3],
    method: OpticalPathMethod,
) -> Result<Array3<f64>> {
    if voxel_sizes_nm.iter().any(|&v| v <= 0.0) {
        return Err(PostError::PipelineError(format!(
            "voxel sizes must be strictly positive, got {:?}",
            voxel_sizes_nm
        )));
    }
    let norm: f64 = beam_direction.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return Err(PostError::PipelineError(
            "beam_direction must be non-zero".to_string(),
        ));
    }

    // Dominant propagation axis; the sign gives the traversal order.
    let axis = (0..3)
        .max_by(|&a, &b| {
            beam_direction[a]
                .abs()
                .total_cmp(&beam_direction[b].abs())
        })
        .unwrap_or(0);
    let forward = beam_direction[axis] >= 0.0;
    let step = voxel_sizes_nm[axis];

    let filled = match method {
        OpticalPathMethod::Threshold => support.clone(),
        OpticalPathMethod::Defect => fill_enclosed_gaps(support, axis),
    };

    let (nz, ny, nx) = support.dim();
    let dims = [nz, ny, nx];
    let n = dims[axis];
    let mut path = Array3::zeros(support.dim());

    // Accumulate crystal thickness lane by lane along the beam axis.
    let other: Vec<usize> = (0..3).filter(|&a| a != axis).collect();
    for u in 0..dims[other[0]] {
        for v in 0..dims[other[1]] {
            let mut depth = 0.0;
            for t in 0..n {
                let pos = if forward { t } else { n - 1 - t };
                let mut idx = [0usize; 3];
                idx[axis] = pos;
                idx[other[0]] = u;
                idx[other[1]] = v;
                let here = (idx[0], idx[1], idx[2]);
                if filled[here] > 0.0 {
                    depth += step;
                }
                if support[here] > 0.0 {
                    path[here] = depth;
                }
            }
        }
    }
    Ok(path)
}

/// Fill gaps of the support that are enclosed by crystal along one axis.
fn fill_enclosed_gaps(support: &Array3<f64>, axis: usize) -> Array3<f64> {
    let (nz, ny, nx) = support.dim();
    let dims = [nz, ny, nx];
    let n = dims[axis];
    let mut filled = support.clone();

    let other: Vec<usize> = (0..3).filter(|&a| a != axis).collect();
    for u in 0..dims[other[0]] {
        for v in 0..dims[other[1]] {
            let at = |t: usize| {
                let mut idx = [0usize; 3];
                idx[axis] = t;
                idx[other[0]] = u;
                idx[other[1]] = v;
                (idx[0], idx[1], idx[2])
            };
            let first = (0..n).find(|&t| support[at(t)] > 0.0);
            let last = (0..n).rev().find(|&t| support[at(t)] > 0.0);
            if let (Some(first), Some(last)) = (first, last) {
                for t in first..=last {
                    filled[at(t)] = 1.0;
                }
            }
        }
    }
    filled
}

/// Apply the refraction (and optionally absorption) correction in place.
///
/// The phase accumulated by propagation through the crystal is
/// `2 pi / lambda * dispersion * path`; it is subtracted from the retrieved
/// phase. Absorption attenuates the modulus with the same path.
pub fn correct_refraction(
    modulus: &mut Array3<f64>,
    phase: &mut Array3<f64>,
    path_nm: &Array3<f64>,
    wavelength_nm: f64,
    dispersion: f64,
    absorption: Option<f64>,
) -> Result<()> {
    if phase.dim() != path_nm.dim() || modulus.dim() != path_nm.dim() {
        return Err(PostError::PipelineError(format!(
            "optical path shape {:?} does not match the object shape {:?}",
            path_nm.dim(),
            phase.dim()
        )));
    }
    if !(wavelength_nm > 0.0) {
        return Err(PostError::PipelineError(format!(
            "wavelength must be strictly positive, got {}",
            wavelength_nm
        )));
    }

    let k = 2.0 * PI / wavelength_nm;
    for (p, &path) in phase.iter_mut().zip(path_nm.iter()) {
        *p -= k * dispersion * path;
    }
    if let Some(beta) = absorption {
        for (m, &path) in modulus.iter_mut().zip(path_nm.iter()) {
            *m *= (-k * beta * path).exp();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn full_support(shape: (usize, usize, usize)) -> Array3<f64> {
        Array3::from_elem(shape, 1.0)
    }

    #[test]
    fn strain_of_linear_phase() {
        // dphi/dz = 0.2 rad/voxel, voxel 2 nm, |q| = 4 1/nm
        let phase = Array3::from_shape_fn((6, 6, 6), |(i, _, _)| 0.2 * i as f64);
        let support = full_support((6, 6, 6));
        let strain = compute_strain(
            &phase,
            &support,
            [2.0, 2.0, 2.0],
            RefAxis::Z,
            4.0,
            StrainMethod::Default,
        )
        .unwrap();
        assert_relative_eq!(strain[(3, 3, 3)], 0.2 / 2.0 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn strain_zero_outside_support() {
        let phase = Array3::from_shape_fn((6, 6, 6), |(i, _, _)| 0.2 * i as f64);
        let mut support = Array3::zeros((6, 6, 6));
        support[(3, 3, 3)] = 1.0;
        let strain = compute_strain(
            &phase,
            &support,
            [1.0; 3],
            RefAxis::Z,
            1.0,
            StrainMethod::Default,
        )
        .unwrap();
        assert_relative_eq!(strain[(0, 0, 0)], 0.0);
        assert!(strain[(3, 3, 3)] != 0.0);
    }

    #[test]
    fn defect_method_zeroes_surface_shell() {
        let phase = Array3::from_shape_fn((8, 8, 8), |(i, _, _)| 0.1 * i as f64);
        let mut support = Array3::zeros((8, 8, 8));
        for i in 2..6 {
            for j in 2..6 {
                for k in 2..6 {
                    support[(i, j, k)] = 1.0;
                }
            }
        }
        let strain = compute_strain(
            &phase,
            &support,
            [1.0; 3],
            RefAxis::Z,
            1.0,
            StrainMethod::Defect,
        )
        .unwrap();
        // Surface voxel zeroed, bulk voxel kept
        assert_relative_eq!(strain[(2, 3, 3)], 0.0);
        assert!(strain[(3, 3, 3)] != 0.0);
    }

    #[test]
    fn strain_axis_selection_uses_ref_axis() {
        let phase = Array3::from_shape_fn((6, 6, 6), |(_, _, k)| 0.3 * k as f64);
        let support = full_support((6, 6, 6));
        let strain = compute_strain(
            &phase,
            &support,
            [1.0; 3],
            RefAxis::X,
            1.0,
            StrainMethod::Default,
        )
        .unwrap();
        assert_relative_eq!(strain[(3, 3, 3)], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn strain_rejects_degenerate_inputs() {
        let phase = Array3::zeros((4, 4, 4));
        let support = full_support((4, 4, 4));
        assert!(
            compute_strain(&phase, &support, [1.0; 3], RefAxis::Y, 0.0, StrainMethod::Default)
                .is_err()
        );
        assert!(
            compute_strain(&phase, &support, [0.0; 3], RefAxis::Y, 1.0, StrainMethod::Default)
                .is_err()
        );
        let small = full_support((3, 3, 3));
        assert!(
            compute_strain(&phase, &small, [1.0; 3], RefAxis::Y, 1.0, StrainMethod::Default)
                .is_err()
        );
    }

    #[test]
    fn erosion_strips_one_voxel() {
        let mut support = Array3::zeros((5, 5, 5));
        for i in 1..4 {
            for j in 1..4 {
                for k in 1..4 {
                    support[(i, j, k)] = 1.0;
                }
            }
        }
        let eroded = erode_support(&support);
        assert_relative_eq!(eroded.sum(), 1.0);
        assert_relative_eq!(eroded[(2, 2, 2)], 1.0);
    }

    #[test]
    fn optical_path_grows_through_a_slab() {
        // Slab spanning z in [1, 4), beam along +z, 2 nm voxels
        let mut support = Array3::zeros((6, 3, 3));
        for i in 1..4 {
            for j in 0..3 {
                for k in 0..3 {
                    support[(i, j, k)] = 1.0;
                }
            }
        }
        let path = optical_path(
            &support,
            [1.0, 0.0, 0.0],
            [2.0, 2.0, 2.0],
            OpticalPathMethod::Threshold,
        )
        .unwrap();
        assert_relative_eq!(path[(1, 1, 1)], 2.0);
        assert_relative_eq!(path[(3, 1, 1)], 6.0);
        // Outside the support the path stays zero
        assert_relative_eq!(path[(5, 1, 1)], 0.0);
    }

    #[test]
    fn optical_path_reversed_beam() {
        let mut support = Array3::zeros((6, 1, 1));
        support[(1, 0, 0)] = 1.0;
        support[(4, 0, 0)] = 1.0;
        let path = optical_path(
            &support,
            [-1.0, 0.0, 0.0],
            [1.0; 3],
            OpticalPathMethod::Threshold,
        )
        .unwrap();
        // Entering from high z, the voxel at z=4 is reached first
        assert_relative_eq!(path[(4, 0, 0)], 1.0);
        assert_relative_eq!(path[(1, 0, 0)], 2.0);
    }

    #[test]
    fn defect_path_bridges_an_enclosed_hole() {
        let mut support = Array3::zeros((7, 1, 1));
        support[(1, 0, 0)] = 1.0;
        // hole at z = 2
        support[(3, 0, 0)] = 1.0;
        let threshold = optical_path(
            &support,
            [1.0, 0.0, 0.0],
            [1.0; 3],
            OpticalPathMethod::Threshold,
        )
        .unwrap();
        let defect = optical_path(
            &support,
            [1.0, 0.0, 0.0],
            [1.0; 3],
            OpticalPathMethod::Defect,
        )
        .unwrap();
        assert_relative_eq!(threshold[(3, 0, 0)], 2.0);
        assert_relative_eq!(defect[(3, 0, 0)], 3.0);
    }

    #[test]
    fn optical_path_rejects_zero_beam() {
        let support = full_support((3, 3, 3));
        assert!(
            optical_path(&support, [0.0; 3], [1.0; 3], OpticalPathMethod::Threshold).is_err()
        );
    }

    #[test]
    fn refraction_shifts_phase_by_path() {
        let mut modulus = Array3::from_elem((2, 2, 2), 1.0);
        let mut phase = Array3::zeros((2, 2, 2));
        let mut path = Array3::zeros((2, 2, 2));
        path[(0, 0, 0)] = 10.0;

        correct_refraction(&mut modulus, &mut phase, &path, 0.1, 1e-5, None).unwrap();
        let expected = -2.0 * PI / 0.1 * 1e-5 * 10.0;
        assert_relative_eq!(phase[(0, 0, 0)], expected, epsilon = 1e-12);
        assert_relative_eq!(phase[(1, 1, 1)], 0.0);
        // Without absorption the modulus is untouched
        assert_relative_eq!(modulus[(0, 0, 0)], 1.0);
    }

    #[test]
    fn absorption_attenuates_modulus() {
        let mut modulus = Array3::from_elem((1, 1, 1), 2.0);
        let mut phase = Array3::zeros((1, 1, 1));
        let path = Array3::from_elem((1, 1, 1), 5.0);

        correct_refraction(&mut modulus, &mut phase, &path, 0.1, 0.0, Some(1e-6)).unwrap();
        let expected = 2.0 * (-2.0 * PI / 0.1 * 1e-6 * 5.0f64).exp();
        assert_relative_eq!(modulus[(0, 0, 0)], expected, epsilon = 1e-12);
    }

    #[test]
    fn refraction_rejects_shape_mismatch() {
        let mut modulus = Array3::from_elem((2, 2, 2), 1.0);
        let mut phase = Array3::zeros((2, 2, 2));
        let path = Array3::zeros((3, 3, 3));
        assert!(correct_refraction(&mut modulus, &mut phase, &path, 0.1, 1e-5, None).is_err());
    }
}
