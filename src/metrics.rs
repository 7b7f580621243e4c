//! Image fidelity metrics: PSNR, NRMSE and SSIM.
//!
//! PSNR and NRMSE use the reference for normalization, so swapping the arguments changes the
//! result in general.

use crate::array_utils::reflect_index;
use crate::error::{ReconError, Result};
use crate::signal_model::sum_of_squares;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array4, ArrayView2, Axis, Zip};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// side length of the square SSIM window
const SSIM_WIN: usize = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub psnr: f64,
    pub nrmse: f64,
    pub ssim: f64,
}

fn mean_squared_error(reference: &Array4<Complex32>, x: &Array4<Complex32>) -> f64 {
    let sum = Zip::from(reference)
        .and(x)
        .par_map_collect(|r, x| (r - x).norm_sqr() as f64)
        .sum();
    sum / reference.len() as f64
}

/// peak signal-to-noise ratio in dB, with the peak taken from the reference magnitude.
/// Identical inputs give +inf.
pub fn compute_psnr(reference: &Array4<Complex32>, x: &Array4<Complex32>) -> Result<f64> {
    check_same_shape(reference, x)?;
    let max = reference.iter().map(|v| v.norm() as f64).fold(0., f64::max);
    let mse = mean_squared_error(reference, x);
    Ok(10. * (max * max / mse).log10())
}

/// root-mean-square error normalized by the root-mean-square of the reference
pub fn compute_nrmse(reference: &Array4<Complex32>, x: &Array4<Complex32>) -> Result<f64> {
    check_same_shape(reference, x)?;
    let rmse = mean_squared_error(reference, x).sqrt();
    let norm = (reference.iter().map(|v| v.norm_sqr() as f64).sum::<f64>() / reference.len() as f64).sqrt();
    Ok(rmse / norm)
}

/// Structural similarity of two real 2-D images using a 7x7 uniform window with reflected
/// boundaries and sample covariances. The data range is taken from the reference. The mean is
/// taken over the interior where the window fits entirely. A constant reference has a zero data
/// range, so both stabilizing constants vanish and flat regions give 0/0: the result is NaN.
pub fn compute_ssim(reference: ArrayView2<f64>, x: ArrayView2<f64>) -> Result<f64> {
    if reference.shape() != x.shape() {
        return Err(ReconError::shape_mismatch("ssim image", reference.shape(), x.shape()));
    }
    let (nr, nc) = reference.dim();
    if nr < SSIM_WIN || nc < SSIM_WIN {
        return Err(ReconError::InvalidShape(format!(
            "ssim needs images of at least {SSIM_WIN}x{SSIM_WIN}, got {nr}x{nc}"
        )));
    }

    let max = reference.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = reference.iter().copied().fold(f64::INFINITY, f64::min);
    let data_range = max - min;

    let np = (SSIM_WIN * SSIM_WIN) as f64;
    let cov_norm = np / (np - 1.);

    let ux = uniform_filter(reference);
    let uy = uniform_filter(x);
    let uxx = uniform_filter((&reference * &reference).view());
    let uyy = uniform_filter((&x * &x).view());
    let uxy = uniform_filter((&reference * &x).view());

    let c1 = (SSIM_K1 * data_range).powi(2);
    let c2 = (SSIM_K2 * data_range).powi(2);

    let pad = (SSIM_WIN - 1) / 2;
    let mut total = 0.;
    let mut count = 0usize;
    for i in pad..nr - pad {
        for j in pad..nc - pad {
            let (mx, my) = (ux[[i, j]], uy[[i, j]]);
            let vx = cov_norm * (uxx[[i, j]] - mx * mx);
            let vy = cov_norm * (uyy[[i, j]] - my * my);
            let vxy = cov_norm * (uxy[[i, j]] - mx * my);
            let a1 = 2. * mx * my + c1;
            let a2 = 2. * vxy + c2;
            let b1 = mx * mx + my * my + c1;
            let b2 = vx + vy + c2;
            total += (a1 * a2) / (b1 * b2);
            count += 1;
        }
    }
    Ok(total / count as f64)
}

/// separable moving average with reflected boundaries
fn uniform_filter(a: ArrayView2<f64>) -> Array2<f64> {
    let half = (SSIM_WIN / 2) as isize;
    let filter_axis = |src: &Array2<f64>, axis: usize| -> Array2<f64> {
        let mut dst = Array2::<f64>::zeros(src.dim());
        Zip::from(dst.lanes_mut(Axis(axis)))
            .and(src.lanes(Axis(axis)))
            .for_each(|mut out, lane| {
                let n = lane.len();
                for (i, o) in out.iter_mut().enumerate() {
                    let s: f64 = (-half..=half)
                        .map(|k| lane[reflect_index(i as isize + k, n)])
                        .sum();
                    *o = s / SSIM_WIN as f64;
                }
            });
        dst
    };
    let rows = filter_axis(&a.to_owned(), 0);
    filter_axis(&rows, 1)
}

/// Compares a candidate (channels, z, y, x) image against a reference. PSNR and NRMSE are taken
/// over the full complex arrays; SSIM is computed on the coil-combined (z, y) image of every
/// index along the last axis and averaged over that axis.
pub fn compute_metrics(reference: &Array4<Complex32>, x: &Array4<Complex32>) -> Result<Metrics> {
    let psnr = compute_psnr(reference, x)?;
    let nrmse = compute_nrmse(reference, x)?;

    let n_slices = reference.len_of(Axis(3));
    let ssim_total = (0..n_slices)
        .into_par_iter()
        .map(|i| {
            let r = sum_of_squares(&reference.index_axis(Axis(3), i), 0).mapv(|v| v as f64);
            let c = sum_of_squares(&x.index_axis(Axis(3), i), 0).mapv(|v| v as f64);
            compute_ssim(r.view(), c.view())
        })
        .collect::<Result<Vec<f64>>>()?
        .into_iter()
        .sum::<f64>();
    let ssim = ssim_total / n_slices as f64;

    Ok(Metrics { psnr, nrmse, ssim })
}

fn check_same_shape(reference: &Array4<Complex32>, x: &Array4<Complex32>) -> Result<()> {
    if reference.shape() != x.shape() {
        return Err(ReconError::shape_mismatch("metric candidate", reference.shape(), x.shape()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::ReconError;
    use crate::mask::{apply_mask, poisson, PoissonOptions};
    use crate::metrics::{compute_metrics, compute_nrmse, compute_psnr, compute_ssim, uniform_filter};
    use crate::signal_model::ifft3c;
    use crate::test_data::phantom_kspace;
    use ndarray::{Array2, Array4};
    use num_complex::Complex32;

    fn test_image() -> Array4<Complex32> {
        ifft3c(&phantom_kspace(2, [12, 12, 10]))
    }

    #[test]
    fn identical_images_are_perfect() {
        let x = test_image();
        let m = compute_metrics(&x, &x).unwrap();
        assert!(m.psnr.is_infinite() && m.psnr > 0.);
        assert_eq!(m.nrmse, 0.);
        assert!((m.ssim - 1.).abs() < 1e-9, "ssim {}", m.ssim);
    }

    #[test]
    fn nrmse_and_psnr_are_directional() {
        let reference = Array4::from_elem((1, 2, 2, 2), Complex32::new(1., 0.));
        let x = Array4::from_elem((1, 2, 2, 2), Complex32::new(2., 0.));
        // reference rms 1, candidate rms 2, error 1 everywhere
        assert!((compute_nrmse(&reference, &x).unwrap() - 1.).abs() < 1e-12);
        assert!((compute_nrmse(&x, &reference).unwrap() - 0.5).abs() < 1e-12);
        // peak 1 vs peak 2 with unit mse
        assert!(compute_psnr(&reference, &x).unwrap().abs() < 1e-9);
        assert!((compute_psnr(&x, &reference).unwrap() - 20. * 2f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn undersampling_lowers_ssim() {
        let kspace = phantom_kspace(2, [24, 24, 8]);
        let mask = poisson([24, 24], 4., [6, 6], 3, &PoissonOptions::default()).unwrap();
        let input = apply_mask(&kspace, &mask).unwrap();
        let truth = ifft3c(&kspace);
        let m = compute_metrics(&truth, &ifft3c(&input)).unwrap();
        assert!(m.ssim < 1. - 1e-6, "ssim {}", m.ssim);
        assert!(m.nrmse > 0.);
        assert!(m.psnr.is_finite());
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = Array4::<Complex32>::zeros((1, 8, 8, 2));
        let b = Array4::<Complex32>::zeros((1, 8, 8, 3));
        assert!(matches!(compute_metrics(&a, &b), Err(ReconError::ShapeMismatch { .. })));
    }

    #[test]
    fn ssim_requires_window_sized_images() {
        let a = Array2::<f64>::zeros((6, 10));
        assert!(matches!(compute_ssim(a.view(), a.view()), Err(ReconError::InvalidShape(_))));
    }

    #[test]
    fn constant_reference_gives_nan_ssim() {
        let a = Array2::from_elem((8, 8), 2.);
        assert!(compute_ssim(a.view(), a.view()).unwrap().is_nan());
    }

    #[test]
    fn uniform_filter_preserves_constants() {
        let a = Array2::from_elem((9, 8), 3.5);
        let f = uniform_filter(a.view());
        assert!(f.iter().all(|&v| (v - 3.5).abs() < 1e-12));
    }
}
