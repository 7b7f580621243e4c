//! Variable-density Poisson-disc undersampling masks for 2-D phase encoding planes.
//!
//! The sampling density falls off with the distance from the fully sampled calibration box. The
//! density slope is found by bisection until the mask reaches the requested acceleration. Every
//! trial re-seeds the generator, so a given (shape, acceleration, calibration, seed, options)
//! always produces the same mask.

use crate::array_utils::centered_range;
use crate::error::{ReconError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Array4, Zip};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// upper bound on density-slope bisection steps
const MAX_BISECTIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonOptions {
    /// acceptable absolute difference between achieved and requested acceleration
    pub tolerance: f64,
    /// candidate points drawn around an active sample before it is retired
    pub max_attempts: usize,
    /// remove samples outside the inscribed ellipse (r >= 1)
    pub crop_corner: bool,
}

impl Default for PoissonOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            max_attempts: 30,
            crop_corner: true,
        }
    }
}

/// Generates a (shape[0], shape[1]) Poisson-disc sampling mask with ones at sampled locations.
/// When the tolerance cannot be met, the mask closest to the requested acceleration is returned.
pub fn poisson(shape: [usize; 2], accel: f64, calib: [usize; 2], seed: u64, options: &PoissonOptions) -> Result<Array2<Complex32>> {
    let [ny, nx] = shape;
    if nx == 0 || ny == 0 {
        return Err(ReconError::InvalidParameter(format!("mask shape {:?} must be non-empty", shape)));
    }
    if !accel.is_finite() || accel < 1. {
        return Err(ReconError::InvalidParameter(format!("acceleration must be >= 1, got {accel}")));
    }

    let r = radial_distance(shape, calib);
    let n_max = nx.max(ny) as f64;
    let n_total = (nx * ny) as f64;

    let mut slope_min = 0.;
    let mut slope_max = n_max;
    let mut best: Option<(f64, f64, Array2<bool>)> = None;

    for _ in 0..MAX_BISECTIONS {
        if slope_min >= slope_max {
            break;
        }
        let slope = (slope_max + slope_min) / 2.;
        let radius_x = r.mapv(|r| ((1. + r * slope) * nx as f64 / n_max).max(1.));
        let radius_y = r.mapv(|r| ((1. + r * slope) * ny as f64 / n_max).max(1.));

        let mut mask = poisson_disc(nx, ny, options.max_attempts, &radius_x, &radius_y, calib, seed);
        if options.crop_corner {
            Zip::from(&mut mask).and(&r).for_each(|m, &r| *m &= r < 1.);
        }

        let n_sampled = mask.iter().filter(|&&m| m).count();
        let actual = n_total / n_sampled as f64;
        let err = (actual - accel).abs();
        debug!("poisson mask slope {:.4}: acceleration {:.3}", slope, actual);

        if best.as_ref().map_or(true, |(e, _, _)| err < *e) {
            best = Some((err, actual, mask));
        }
        if err < options.tolerance {
            break;
        }
        if actual < accel {
            slope_min = slope;
        } else {
            slope_max = slope;
        }
    }

    let (err, actual, mask) = best.ok_or_else(|| ReconError::InvalidParameter("no mask trial was run".to_string()))?;
    if err >= options.tolerance {
        warn!(
            "requested acceleration {} not reachable within {}; using closest mask (R = {:.3})",
            accel, options.tolerance, actual
        );
    }
    Ok(mask.mapv(|m| if m { Complex32::ONE } else { Complex32::ZERO }))
}

/// normalized distance from the k-space center, measured from the edge of the calibration box
fn radial_distance(shape: [usize; 2], calib: [usize; 2]) -> Array2<f64> {
    let axis_distance = |n: usize, c: usize| {
        let d = (0..n)
            .map(|i| ((i as f64 - n as f64 / 2.).abs() - c as f64 / 2.).max(0.))
            .collect::<Vec<_>>();
        let max = d.iter().copied().fold(0., f64::max);
        if max > 0. {
            d.into_iter().map(|v| v / max).collect()
        } else {
            d
        }
    };
    let dy = axis_distance(shape[0], calib[0]);
    let dx = axis_distance(shape[1], calib[1]);
    Array2::from_shape_fn((shape[0], shape[1]), |(iy, ix)| (dx[ix].powi(2) + dy[iy].powi(2)).sqrt())
}

/// dart-throwing Poisson-disc sampler with spatially varying elliptical exclusion radii
fn poisson_disc(
    nx: usize,
    ny: usize,
    max_attempts: usize,
    radius_x: &Array2<f64>,
    radius_y: &Array2<f64>,
    calib: [usize; 2],
    seed: u64,
) -> Array2<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut mask = Array2::from_elem((ny, nx), false);

    let first = (rng.random_range(0..nx), rng.random_range(0..ny));
    mask[[first.1, first.0]] = true;
    let mut actives = vec![first];

    while !actives.is_empty() {
        let i = rng.random_range(0..actives.len());
        let (px, py) = actives[i];
        let rx = radius_x[[py, px]];
        let ry = radius_y[[py, px]];

        let mut accepted = None;
        for _ in 0..max_attempts {
            // candidate between r and 2r from the active point
            let v = (rng.random::<f64>() * 3. + 1.).sqrt();
            let t = 2. * PI * rng.random::<f64>();
            let qx = px as f64 + v * rx * t.cos();
            let qy = py as f64 + v * ry * t.sin();
            if qx < 0. || qx >= nx as f64 || qy < 0. || qy >= ny as f64 {
                continue;
            }
            if mask[[qy as usize, qx as usize]] {
                continue;
            }

            let start_x = ((qx - rx) as isize).max(0) as usize;
            let end_x = ((qx + rx + 1.) as usize).min(nx);
            let start_y = ((qy - ry) as isize).max(0) as usize;
            let end_y = ((qy + ry + 1.) as usize).min(ny);
            let blocked = (start_y..end_y).any(|y| {
                (start_x..end_x).any(|x| {
                    mask[[y, x]]
                        && ((qx - x as f64) / radius_x[[y, x]]).powi(2) + ((qy - y as f64) / radius_y[[y, x]]).powi(2) < 1.
                })
            });
            if !blocked {
                accepted = Some((qx as usize, qy as usize));
                break;
            }
        }

        match accepted {
            Some((qx, qy)) => {
                mask[[qy, qx]] = true;
                actives.push((qx, qy));
            }
            None => {
                actives.swap_remove(i);
            }
        }
    }

    mask.slice_mut(s![centered_range(ny, calib[0]), centered_range(nx, calib[1])]).fill(true);
    mask
}

/// Applies a (z, y) mask to (channels, z, y, x) k-space, i.e. multiplies by the mask reshaped to
/// (1, z, y, 1).
pub fn apply_mask(kspace: &Array4<Complex32>, mask: &Array2<Complex32>) -> Result<Array4<Complex32>> {
    let (_, nz, ny, _) = kspace.dim();
    if mask.dim() != (nz, ny) {
        return Err(ReconError::shape_mismatch("sampling mask (z, y)", &[nz, ny], mask.shape()));
    }
    let mut masked = kspace.clone();
    Zip::indexed(&mut masked).par_for_each(|(_, iz, iy, _), v| *v *= mask[[iz, iy]]);
    Ok(masked)
}
