use crate::error::{ReconError, Result};
use image::GrayImage;
use ndarray::{s, Array2, Array3, ArrayView2};
use num_complex::Complex32;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// fraction of the volume maximum mapped to full white
const VIEW_SCALE: f32 = 0.9;

fn with_suffix(filebase: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = filebase.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// writes an 8-bit grayscale png with one image row per array row
fn write_gray_png(path: &Path, pixels: ArrayView2<u8>) -> Result<()> {
    let (rows, cols) = pixels.dim();
    let buf = pixels.iter().copied().collect::<Vec<u8>>();
    let img = GrayImage::from_raw(cols as u32, rows as u32, buf).ok_or_else(|| {
        ReconError::InvalidShape(format!("cannot build a {rows}x{cols} image buffer"))
    })?;
    img.save(path)?;
    Ok(())
}

/// Renders the middle sagittal, coronal and axial slices of a (z, y, x) magnitude volume to
/// `<filebase>_sag.png`, `<filebase>_cor.png` and `<filebase>_ax.png`. Intensities are scaled so
/// that 90% of the volume maximum maps to 255; the float to u8 conversion saturates, so brighter
/// voxels clip to 255 and an all-zero volume (0/0) renders black.
pub fn write_views_png(filebase: impl AsRef<Path>, image: &Array3<f32>) -> Result<[PathBuf; 3]> {
    let filebase = filebase.as_ref();
    let max = image.iter().map(|v| v.abs()).fold(0f32, f32::max);
    let scale = 255. / (max * VIEW_SCALE);
    let scaled = image.mapv(|v| (v * scale) as u8);

    let (nz, ny, nx) = scaled.dim();
    let views = [
        ("_sag.png", scaled.slice(s![nz / 2, .., ..])),
        ("_cor.png", scaled.slice(s![.., ny / 2, ..])),
        ("_ax.png", scaled.slice(s![.., .., nx / 2])),
    ];
    let mut written = Vec::with_capacity(3);
    for (suffix, view) in views {
        let path = with_suffix(filebase, suffix);
        write_gray_png(&path, view)?;
        written.push(path);
    }
    let [sag, cor, ax]: [PathBuf; 3] = written
        .try_into()
        .map_err(|_| ReconError::InvalidShape("expected three views".to_string()))?;
    Ok([sag, cor, ax])
}

/// writes the magnitude of a sampling mask as a black and white png
pub fn write_mask_png(path: impl AsRef<Path>, mask: &Array2<Complex32>) -> Result<()> {
    let pixels = mask.mapv(|v| (v.norm() * 255.) as u8);
    write_gray_png(path.as_ref(), pixels.view())
}

/// Opens a rendered view in the platform image viewer. Display problems never abort a run.
pub fn show_view(path: &Path, title: &str) {
    info!("displaying {} ({})", title, path.display());
    let command = if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(path);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]).arg(path);
        c
    } else {
        let mut c = Command::new("xdg-open");
        c.arg(path);
        c
    };
    if let Err(e) = spawn_reaped(command) {
        warn!("could not display {}: {}", path.display(), e);
    }
}

/// starts `command` and waits for it on a background thread so the child is always reaped
fn spawn_reaped(mut command: Command) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
    let mut child = command.spawn()?;
    Ok(thread::spawn(move || child.wait()))
}
