mod array_utils;
pub mod compare;
pub mod data_import;
pub mod error;
pub mod fftshift;
pub mod logging;
pub mod mask;
pub mod metrics;
pub mod model;
pub mod render;
pub mod sensemap;
pub mod signal_model;
pub mod unrolled;

use crate::mask::PoissonOptions;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

pub use crate::compare::{compare_exec, ModelReport, Report};
pub use crate::error::{ReconError, Result};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "compare MRI reconstruction models against fully sampled k-space")]
pub struct CompareArgs {
    /// directory holding one sub-directory per model
    pub model_root_dir: PathBuf,
    /// fully sampled (channels, z, y, x) k-space (.npy, or a cfl base name)
    pub kspace_truth: PathBuf,
    /// directory for all outputs, created when missing
    pub output_dir: PathBuf,
    /// sensitivity maps to use instead of estimating them
    #[arg(long)]
    pub sensemap: Option<PathBuf>,
    /// accelerator device handed to the models
    #[arg(long, default_value = "0")]
    pub device: String,
    /// number of slices a model processes per batch
    #[arg(long = "batch_size", default_value_t = 1)]
    pub batch_size: usize,
    /// log progress (INFO) instead of warnings only
    #[arg(long)]
    pub verbose: bool,
    /// open rendered views in an image viewer
    #[arg(long)]
    pub plot: bool,
    /// also write the log to this file
    #[arg(long)]
    pub logfile: Option<PathBuf>,
    /// run parameters file (toml), defaults are used when omitted
    #[arg(long)]
    pub params: Option<PathBuf>,
}

/// Run parameters. The defaults reproduce the standard evaluation protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareParams {
    /// sampling mask seed
    pub seed: u64,
    /// target acceleration factor of the sampling mask
    pub acceleration: f64,
    /// calibration box width, used for the mask and for sensitivity estimation
    pub calibration: usize,
    pub mask_tolerance: f64,
    pub mask_max_attempts: usize,
    pub crop_corner: bool,
    /// also export k-space as BART cfl/hdr pairs
    pub write_cfl: bool,
}

impl Default for CompareParams {
    fn default() -> Self {
        Self {
            seed: 1000,
            acceleration: 12.,
            calibration: 20,
            mask_tolerance: 0.1,
            mask_max_attempts: 30,
            crop_corner: true,
            write_cfl: false,
        }
    }
}

impl CompareParams {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let toml_str = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&toml_str)?)
    }

    /// writes the parameters to `path` with a toml extension and returns the written path
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let mut toml_string = toml::to_string(self)?;
        toml_string.push('\n');
        let filename = path.as_ref().with_extension("toml");
        fs::write(&filename, toml_string)?;
        Ok(filename)
    }

    pub fn poisson_options(&self) -> PoissonOptions {
        PoissonOptions {
            tolerance: self.mask_tolerance,
            max_attempts: self.mask_max_attempts,
            crop_corner: self.crop_corner,
        }
    }
}

/// Process-level settings threaded through a run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub log_level: Level,
    /// accelerator device id passed to every model
    pub device: String,
    pub plot: bool,
}

impl RunContext {
    pub fn from_args(args: &CompareArgs) -> Self {
        Self {
            log_level: logging::run_level(args.verbose),
            device: args.device.clone(),
            plot: args.plot,
        }
    }
}

/// synthetic multi-coil k-space shared by the unit tests
#[cfg(test)]
pub(crate) mod test_data {
    use crate::signal_model::fft3c;
    use ndarray::Array4;
    use num_complex::Complex32;
    use std::f32::consts::PI;

    /// Smooth coil-weighted phantom: a positive background with a brighter off-center ellipsoid,
    /// multiplied by smoothly varying complex coil profiles and transformed to k-space.
    pub(crate) fn phantom_kspace(channels: usize, shape: [usize; 3]) -> Array4<Complex32> {
        let [nz, ny, nx] = shape;
        let image = Array4::from_shape_fn((channels, nz, ny, nx), |(c, z, y, x)| {
            let pz = (z as f32 + 0.5) / nz as f32 - 0.5;
            let py = (y as f32 + 0.5) / ny as f32 - 0.5;
            let px = (x as f32 + 0.5) / nx as f32 - 0.5;

            let r2 = ((pz - 0.05) / 0.35).powi(2) + (py / 0.3).powi(2) + ((px + 0.05) / 0.4).powi(2);
            let object = 0.3 + 0.2 * (PI * py).cos() + if r2 < 1. { 1. - 0.5 * r2 } else { 0. };

            let angle = 2. * PI * c as f32 / channels.max(1) as f32;
            let gain = 1. + 0.4 * (pz * angle.cos() + py * angle.sin());
            let phase = 0.4 * c as f32 + 0.8 * px;
            Complex32::from_polar(object * gain, phase)
        });
        fft3c(&image)
    }
}
