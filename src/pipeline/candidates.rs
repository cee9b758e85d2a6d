//! Sorting and averaging of reconstruction candidates.
//!
//! Phase retrieval yields several candidate objects per scan. The best one
//! (per the configured quality metric) seeds the average; the others
//! contribute only when they correlate with it above the configured
//! threshold.

use crate::config::{AveragingSpace, SortMethod};
use crate::error::{PostError, Result};
use crate::volume::{self, ComplexVolume, FftDirection, fft3};

/// Candidate order by quality, best first.
///
/// Metrics are evaluated on the modulus inside the support at
/// `support_threshold`. Amplitude and volume rank descending, the variance
/// metrics ascending (a flat-density crystal is the better reconstruction).
pub fn sort_candidates(
    candidates: &[ComplexVolume],
    method: SortMethod,
    support_threshold: f64,
) -> Result<Vec<usize>> {
    if candidates.is_empty() {
        return Err(PostError::PipelineError(
            "no reconstruction candidate to sort".to_string(),
        ));
    }

    let mut scored: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        scored.push((index, quality_metric(candidate, method, support_threshold)?));
    }

    match method {
        SortMethod::MeanAmplitude | SortMethod::Volume => {
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        }
        SortMethod::Variance | SortMethod::VarianceOverMean => {
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
    }
    Ok(scored.into_iter().map(|(index, _)| index).collect())
}

fn quality_metric(
    candidate: &ComplexVolume,
    method: SortMethod,
    support_threshold: f64,
) -> Result<f64> {
    let modulus = volume::modulus(candidate);
    let support = volume::support_from_modulus(&modulus, support_threshold);

    let inside: Vec<f64> = modulus
        .iter()
        .zip(support.iter())
        .filter(|&(_, &s)| s > 0.0)
        .map(|(&m, _)| m)
        .collect();
    if inside.is_empty() {
        return Err(PostError::PipelineError(
            "candidate has an empty support, cannot evaluate its quality".to_string(),
        ));
    }

    let count = inside.len() as f64;
    let mean = inside.iter().sum::<f64>() / count;
    let variance = inside.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;

    Ok(match method {
        SortMethod::MeanAmplitude => mean,
        SortMethod::Variance => variance,
        SortMethod::VarianceOverMean => variance / mean,
        SortMethod::Volume => count,
    })
}

/// Pearson correlation between two candidates in the chosen space.
///
/// Direct space correlates the moduli; reciprocal space correlates the
/// moduli of the Fourier transforms, which is insensitive to a relative
/// translation between the candidates.
pub fn correlation(
    a: &ComplexVolume,
    b: &ComplexVolume,
    space: AveragingSpace,
) -> Result<f64> {
    if a.dim() != b.dim() {
        return Err(PostError::PipelineError(format!(
            "candidate shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }

    let (va, vb) = match space {
        AveragingSpace::DirectSpace => (volume::modulus(a), volume::modulus(b)),
        AveragingSpace::ReciprocalSpace => (
            volume::modulus(&fft3(a, FftDirection::Forward)),
            volume::modulus(&fft3(b, FftDirection::Forward)),
        ),
    };

    let n = va.len() as f64;
    let mean_a = va.sum() / n;
    let mean_b = vb.sum() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in va.iter().zip(vb.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return Err(PostError::PipelineError(
            "candidate modulus is constant, correlation is undefined".to_string(),
        ));
    }
    Ok(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Average the candidates that correlate with the best one.
///
/// Returns the averaged object and the number of candidates kept. Candidates
/// below `correlation_threshold` are skipped, not aligned.
pub fn average_candidates(
    candidates: &[ComplexVolume],
    order: &[usize],
    correlation_threshold: f64,
    space: AveragingSpace,
) -> Result<(ComplexVolume, usize)> {
    let &best = order.first().ok_or_else(|| {
        PostError::PipelineError("no reconstruction candidate to average".to_string())
    })?;
    let reference = &candidates[best];
    let mut sum = reference.clone();
    let mut kept = 1usize;

    for &index in &order[1..] {
        let corr = correlation(reference, &candidates[index], space)?;
        if corr >= correlation_threshold {
            sum += &candidates[index];
            kept += 1;
        } else {
            tracing::debug!(
                candidate = index,
                correlation = corr,
                threshold = correlation_threshold,
                "candidate skipped during averaging"
            );
        }
    }

    let scale = 1.0 / kept as f64;
    sum.mapv_inplace(|v| v * scale);
    Ok((sum, kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use num_complex::Complex64;

    fn box_candidate(amplitude: f64, half: usize) -> ComplexVolume {
        let mut data = Array3::zeros((10, 10, 10));
        for i in 5 - half..5 + half {
            for j in 5 - half..5 + half {
                for k in 5 - half..5 + half {
                    data[(i, j, k)] = Complex64::new(amplitude, 0.0);
                }
            }
        }
        data
    }

    fn noisy_candidate(amplitude: f64) -> ComplexVolume {
        let mut data = box_candidate(amplitude, 2);
        // Deterministic ripple inside the box
        for (idx, ((i, j, k), v)) in data.indexed_iter_mut().enumerate() {
            if v.re > 0.0 {
                *v += Complex64::new(0.1 * ((idx + i + j + k) % 3) as f64, 0.0);
            }
        }
        data
    }

    #[test]
    fn sort_by_mean_amplitude_prefers_brighter() {
        let candidates = vec![box_candidate(1.0, 2), box_candidate(3.0, 2)];
        let order = sort_candidates(&candidates, SortMethod::MeanAmplitude, 0.2).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn sort_by_volume_prefers_larger_support() {
        let candidates = vec![box_candidate(1.0, 1), box_candidate(1.0, 3)];
        let order = sort_candidates(&candidates, SortMethod::Volume, 0.2).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn sort_by_variance_prefers_flatter() {
        let candidates = vec![noisy_candidate(1.0), box_candidate(1.0, 2)];
        let order = sort_candidates(&candidates, SortMethod::Variance, 0.2).unwrap();
        assert_eq!(order[0], 1);
    }

    #[test]
    fn sort_rejects_empty_list_and_empty_support() {
        assert!(sort_candidates(&[], SortMethod::MeanAmplitude, 0.2).is_err());
        let empty = Array3::zeros((4, 4, 4));
        assert!(sort_candidates(&[empty], SortMethod::MeanAmplitude, 0.2).is_err());
    }

    #[test]
    fn correlation_of_identical_candidates_is_one() {
        let a = noisy_candidate(1.0);
        let corr = correlation(&a, &a, AveragingSpace::DirectSpace).unwrap();
        assert_relative_eq!(corr, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn reciprocal_correlation_ignores_translation() {
        let a = box_candidate(1.0, 2);
        let b = crate::volume::roll(&a, [2, 0, 0]);
        let direct = correlation(&a, &b, AveragingSpace::DirectSpace).unwrap();
        let reciprocal = correlation(&a, &b, AveragingSpace::ReciprocalSpace).unwrap();
        assert!(reciprocal > direct);
        assert_relative_eq!(reciprocal, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn correlation_rejects_shape_mismatch() {
        let a = box_candidate(1.0, 2);
        let b: ComplexVolume = Array3::zeros((4, 4, 4));
        assert!(correlation(&a, &b, AveragingSpace::DirectSpace).is_err());
    }

    #[test]
    fn averaging_keeps_correlated_candidates() {
        let a = noisy_candidate(1.0);
        let candidates = vec![a.clone(), a.clone()];
        let (avg, kept) =
            average_candidates(&candidates, &[0, 1], 0.9, AveragingSpace::DirectSpace).unwrap();
        assert_eq!(kept, 2);
        assert_relative_eq!(avg[(5, 5, 5)].re, a[(5, 5, 5)].re, epsilon = 1e-12);
    }

    #[test]
    fn averaging_skips_uncorrelated_candidates() {
        let a = noisy_candidate(1.0);
        // Candidate concentrated in a different corner
        let mut b: ComplexVolume = Array3::zeros((10, 10, 10));
        b[(1, 1, 1)] = Complex64::new(5.0, 0.0);
        b[(1, 1, 2)] = Complex64::new(1.0, 0.0);

        let candidates = vec![a.clone(), b];
        let (avg, kept) =
            average_candidates(&candidates, &[0, 1], 0.9, AveragingSpace::DirectSpace).unwrap();
        assert_eq!(kept, 1);
        assert_relative_eq!(avg[(5, 5, 5)].re, a[(5, 5, 5)].re, epsilon = 1e-12);
    }
}
