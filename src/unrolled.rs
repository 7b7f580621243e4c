//! Unrolled proximal-gradient SENSE reconstruction.
//!
//! Each model directory carries a `model.toml` with the unrolling parameters. The data are
//! inverse transformed along the readout (x) so that every x position becomes an independent
//! 2-D (z, y) problem. Slices are reconstructed in batches of `batch_size`, in parallel within a
//! batch, and transformed back to k-space at the end.

use crate::error::{ReconError, Result};
use crate::model::{ModelLoader, ModelSpec, ReconModel};
use crate::signal_model::{fftc_axes, sense_adjoint, sense_forward, ModelDirection};
use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView2, ArrayView3, ArrayView4, Axis, Zip};
use num_complex::Complex32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, Level};

/// parameter file expected in every model directory
pub const MODEL_PARAMS_FILE: &str = "model.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnrolledParams {
    /// number of unrolled gradient + shrinkage steps
    pub iterations: usize,
    /// gradient step; maps with unit sum-of-squares make 1.0 a safe choice
    pub step_size: f32,
    /// soft threshold as a fraction of the peak zero-filled image magnitude
    pub threshold: f32,
    /// restore measured samples in the output k-space
    pub data_consistency: bool,
}

impl Default for UnrolledParams {
    fn default() -> Self {
        Self {
            iterations: 10,
            step_size: 1.0,
            threshold: 0.02,
            data_consistency: true,
        }
    }
}

impl UnrolledParams {
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let config_err = |reason: String| ReconError::ModelConfig { path: file.to_path_buf(), reason };
        let text = fs::read_to_string(file).map_err(|e| config_err(e.to_string()))?;
        let params: UnrolledParams = toml::from_str(&text).map_err(|e| config_err(e.to_string()))?;
        if !(params.step_size > 0.) || !params.step_size.is_finite() {
            return Err(config_err(format!("step_size must be positive, got {}", params.step_size)));
        }
        if !(params.threshold >= 0.) || !params.threshold.is_finite() {
            return Err(config_err(format!("threshold must be non-negative, got {}", params.threshold)));
        }
        Ok(params)
    }
}

/// builds [UnrolledModel]s from `<model dir>/model.toml`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrolledLoader;

impl ModelLoader for UnrolledLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn ReconModel>> {
        if spec.batch_size == 0 {
            return Err(ReconError::InvalidParameter("batch size must be at least 1".to_string()));
        }
        let params = UnrolledParams::from_file(spec.path.join(MODEL_PARAMS_FILE))?;
        debug!(
            "unrolled model {}: {:?} (device {})",
            spec.path.display(),
            params,
            spec.device
        );
        Ok(Box::new(UnrolledModel::new(params, spec.clone())))
    }
}

pub struct UnrolledModel {
    params: UnrolledParams,
    spec: ModelSpec,
}

impl UnrolledModel {
    pub fn new(params: UnrolledParams, spec: ModelSpec) -> Self {
        Self { params, spec }
    }
}

impl ReconModel for UnrolledModel {
    fn run(&mut self, kspace: Array4<Complex32>, sensemap: &Array5<Complex32>) -> Result<Array4<Complex32>> {
        let (nc, nz, ny, nx) = kspace.dim();
        let expected = [self.spec.channels, self.spec.shape_z, self.spec.shape_y];
        if [nc, nz, ny] != expected {
            return Err(ReconError::shape_mismatch("model input (channels, z, y)", &expected, &[nc, nz, ny]));
        }
        if &sensemap.shape()[1..] != kspace.shape() {
            return Err(ReconError::shape_mismatch(
                "model sensitivity maps (channels, z, y, x)",
                kspace.shape(),
                &sensemap.shape()[1..],
            ));
        }

        let mask = sampling_pattern(&kspace);
        let mut hybrid = kspace;
        fftc_axes(&mut hybrid, &[3], ModelDirection::Inverse);

        let params = &self.params;
        let report = self.spec.log_level >= Level::INFO;
        let batch_size = self.spec.batch_size.max(1);
        let n_batches = nx.div_ceil(batch_size);
        let slice_indices = (0..nx).collect::<Vec<_>>();

        let mut output = Array4::<Complex32>::zeros(hybrid.raw_dim());
        for (batch_id, batch) in slice_indices.chunks(batch_size).enumerate() {
            debug!("reconstructing slice batch {} of {}", batch_id + 1, n_batches);
            let slices = batch
                .par_iter()
                .map(|&ix| {
                    reconstruct_slice(
                        hybrid.index_axis(Axis(3), ix),
                        sensemap.index_axis(Axis(4), ix),
                        mask.view(),
                        params,
                    )
                })
                .collect::<Vec<_>>();
            for (&ix, slice) in batch.iter().zip(slices) {
                output.index_axis_mut(Axis(3), ix).assign(&slice);
            }
        }

        if report {
            let residual = data_residual(&output, &hybrid, mask.view());
            info!("    relative data residual: {:.4e}", residual);
        }

        fftc_axes(&mut output, &[3], ModelDirection::Forward);
        Ok(output)
    }
}

/// (z, y) locations holding at least one non-zero sample in any channel or readout position
fn sampling_pattern(kspace: &Array4<Complex32>) -> Array2<bool> {
    let (_, nz, ny, _) = kspace.dim();
    Array2::from_shape_fn((nz, ny), |(iz, iy)| {
        kspace.slice(s![.., iz, iy, ..]).iter().any(|v| *v != Complex32::ZERO)
    })
}

/// proximal-gradient SENSE reconstruction of one (channels, z, y) slice, returning k-space
fn reconstruct_slice(
    measured: ArrayView3<Complex32>,
    maps: ArrayView4<Complex32>,
    mask: ArrayView2<bool>,
    params: &UnrolledParams,
) -> Array3<Complex32> {
    let mut x = sense_adjoint(measured, maps, Some(mask));
    let peak = x.iter().map(|v| v.norm()).fold(0f32, f32::max);
    let threshold = params.threshold * peak;
    let step = Complex32::new(-params.step_size, 0.);

    for _ in 0..params.iterations {
        let mut residual = sense_forward(x.view(), maps, Some(mask));
        residual -= &measured;
        let gradient = sense_adjoint(residual.view(), maps, Some(mask));
        x.scaled_add(step, &gradient);
        soft_threshold(&mut x, threshold);
    }

    let mut kspace = sense_forward(x.view(), maps, None);
    if params.data_consistency {
        for (mut k, y) in kspace.axis_iter_mut(Axis(0)).zip(measured.axis_iter(Axis(0))) {
            Zip::from(&mut k).and(&y).and(&mask).for_each(|k, &y, &sampled| {
                if sampled {
                    *k = y;
                }
            });
        }
    }
    kspace
}

/// complex soft thresholding: shrinks magnitudes by `threshold`, keeps phase
fn soft_threshold(x: &mut Array3<Complex32>, threshold: f32) {
    x.par_mapv_inplace(|v| {
        let m = v.norm();
        if m > threshold {
            v * ((m - threshold) / m)
        } else {
            Complex32::ZERO
        }
    });
}

/// ||M (out - measured)|| / ||measured|| over the whole hybrid-space volume
fn data_residual(output: &Array4<Complex32>, measured: &Array4<Complex32>, mask: ArrayView2<bool>) -> f64 {
    let mut err = 0f64;
    let mut norm = 0f64;
    for (((_, iz, iy, _), o), m) in output.indexed_iter().zip(measured.iter()) {
        if mask[[iz, iy]] {
            err += (o - m).norm_sqr() as f64;
            norm += m.norm_sqr() as f64;
        }
    }
    if norm > 0. {
        (err / norm).sqrt()
    } else {
        0.
    }
}
