//! Reconstruction model seam.
//!
//! A model directory is one evaluation unit. A [ModelLoader] turns a directory plus the data
//! geometry into a [ReconModel] instance, which is run once and dropped.

use crate::error::{ReconError, Result};
use glob::MatchOptions;
use ndarray::{Array4, Array5};
use num_complex::Complex32;
use std::path::{Path, PathBuf};
use tracing::Level;

/// Everything a loader needs to bind a model to the data set being evaluated
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub path: PathBuf,
    pub channels: usize,
    pub shape_z: usize,
    pub shape_y: usize,
    pub batch_size: usize,
    pub log_level: Level,
    /// accelerator identifier handed through to backends that use one
    pub device: String,
}

pub trait ReconModel {
    /// reconstructs (channels, z, y, x) k-space from undersampled k-space and
    /// (maps, channels, z, y, x) sensitivity maps
    fn run(&mut self, kspace: Array4<Complex32>, sensemap: &Array5<Complex32>) -> Result<Array4<Complex32>>;
}

pub trait ModelLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn ReconModel>>;
}

/// A discovered model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// directory base name, used to name outputs
    pub name: String,
    pub path: PathBuf,
}

/// Lists the non-hidden sub-directories of `root` in lexicographic order
pub fn discover_models(root: impl AsRef<Path>) -> Result<Vec<ModelEntry>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ReconError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("model root {} is not a directory", root.display()),
        )));
    }
    let pattern = format!("{}/*", glob::Pattern::escape(&root.to_string_lossy()));
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..Default::default()
    };

    let mut entries = Vec::new();
    for path in glob::glob_with(&pattern, options)? {
        let path = path?;
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        entries.push(ModelEntry { name, path });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use crate::model::discover_models;
    use std::fs;

    #[test]
    fn models_are_sorted_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", "m[1]", ".hidden"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();

        let models = discover_models(dir.path()).unwrap();
        let names = models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["alpha", "m[1]", "zeta"]);
        assert_eq!(models[0].path, dir.path().join("alpha"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_models(dir.path().join("nope")).is_err());
    }
}
