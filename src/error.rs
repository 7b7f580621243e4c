//! Error types shared by the comparison pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for reconstruction comparison operations
pub type Result<T> = std::result::Result<T, ReconError>;

/// Errors that can occur while preparing data, running models or writing results
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read npy array: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("failed to write npy array: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("failed to parse parameter file: {0}")]
    ParamsRead(#[from] toml::de::Error),

    #[error("failed to serialize parameters: {0}")]
    ParamsWrite(#[from] toml::ser::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to list directory entry: {0}")]
    Glob(#[from] glob::GlobError),

    /// Two arrays that must agree in shape do not
    #[error("{what}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An array has an unexpected number of axes
    #[error("{what}: expected {expected} axes, got {actual}")]
    Dimensionality {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("sensitivity map estimation failed: {0}")]
    Sensemap(String),

    #[error("model configuration error in {}: {reason}", path.display())]
    ModelConfig { path: PathBuf, reason: String },

    #[error("malformed cfl data {}: {reason}", path.display())]
    Cfl { path: PathBuf, reason: String },
}

impl ReconError {
    pub(crate) fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ReconError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
