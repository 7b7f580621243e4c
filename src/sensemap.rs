//! Coil sensitivity maps: estimation from the calibration region and layout normalization.

use crate::array_utils::centered_range;
use crate::error::{ReconError, Result};
use crate::signal_model::{ifft3c, sum_of_squares};
use ndarray::parallel::prelude::*;
use ndarray::{Array4, Array5, ArrayD, Axis, Ix4, Ix5, Zip};
use num_complex::Complex32;
use std::f32::consts::PI;

/// voxels whose coil-combined magnitude is below this fraction of the maximum get zero maps
const SUPPORT_THRESHOLD: f32 = 1e-6;

/// Estimates per-coil sensitivities from the fully sampled k-space center. The centered
/// `calib_width` cube (clipped to each axis) is Hann windowed, transformed to low-resolution coil
/// images and normalized by their sum of squares. Returns (channels, z, y, x) maps.
pub fn estimate_sensemap(kspace: &Array4<Complex32>, calib_width: usize) -> Result<Array4<Complex32>> {
    if calib_width == 0 {
        return Err(ReconError::Sensemap("calibration width must be at least 1".to_string()));
    }
    let (_, nz, ny, nx) = kspace.dim();
    if nz == 0 || ny == 0 || nx == 0 {
        return Err(ReconError::Sensemap(format!("empty k-space {:?}", kspace.shape())));
    }

    let rz = centered_range(nz, calib_width);
    let ry = centered_range(ny, calib_width);
    let rx = centered_range(nx, calib_width);
    let wz = hann_window(nz, rz.start, rz.len());
    let wy = hann_window(ny, ry.start, ry.len());
    let wx = hann_window(nx, rx.start, rx.len());

    let mut calib = kspace.clone();
    Zip::indexed(&mut calib).par_for_each(|(_, iz, iy, ix), v| *v *= wz[iz] * wy[iy] * wx[ix]);

    let coil_images = ifft3c(&calib);
    let sos = sum_of_squares(&coil_images, 0);
    let max = sos.iter().copied().fold(0f32, f32::max);
    if !(max > 0.) || !max.is_finite() {
        return Err(ReconError::Sensemap("calibration region contains no usable signal".to_string()));
    }
    let floor = SUPPORT_THRESHOLD * max;

    let mut maps = coil_images;
    maps.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut coil| {
        Zip::from(&mut coil).and(&sos).for_each(|s, &norm| {
            *s = if norm > floor { *s / norm } else { Complex32::ZERO };
        });
    });
    Ok(maps)
}

/// window that is zero outside [start, start + width) and a periodic Hann taper inside
fn hann_window(n: usize, start: usize, width: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            if i < start || i >= start + width {
                0.
            } else {
                let t = (i - start) as f32 + 0.5;
                (PI * t / width as f32).sin().powi(2)
            }
        })
        .collect()
}

/// Brings sensitivity maps into (maps, channels, z, y, x) layout, inserting a leading singleton
/// maps axis when it is absent.
pub fn expand_maps_axis(maps: ArrayD<Complex32>) -> Result<Array5<Complex32>> {
    match maps.ndim() {
        5 => Ok(maps.into_dimensionality::<Ix5>()?),
        4 => Ok(maps.into_dimensionality::<Ix4>()?.insert_axis(Axis(0))),
        n => Err(ReconError::Dimensionality {
            what: "sensitivity maps (maps, channels, z, y, x)",
            expected: 5,
            actual: n,
        }),
    }
}

/// checks that the non-maps axes of a sensitivity map agree with the k-space shape
pub fn check_sensemap(maps: &Array5<Complex32>, kspace_shape: &[usize]) -> Result<()> {
    if &maps.shape()[1..] != kspace_shape {
        return Err(ReconError::shape_mismatch(
            "sensitivity maps (channels, z, y, x)",
            kspace_shape,
            &maps.shape()[1..],
        ));
    }
    Ok(())
}
