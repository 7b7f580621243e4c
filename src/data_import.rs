use crate::error::{ReconError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use ndarray::{Array4, ArrayBase, ArrayD, Data, Dimension, Ix4, IxDyn};
use num_complex::{Complex32, Complex64};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// loads a complex-valued array of any dimensionality. Files ending in `.npy` are read as numpy
/// arrays (complex64 or complex128); anything else is treated as a BART cfl/hdr pair.
pub fn load_complex_array(path: impl AsRef<Path>) -> Result<ArrayD<Complex32>> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => read_npy_complex(path),
        _ => read_cfl(path),
    }
}

/// loads (channels, z, y, x) k-space data
pub fn load_kspace(path: impl AsRef<Path>) -> Result<Array4<Complex32>> {
    let a = load_complex_array(path)?;
    if a.ndim() != 4 {
        return Err(ReconError::Dimensionality {
            what: "k-space (channels, z, y, x)",
            expected: 4,
            actual: a.ndim(),
        });
    }
    Ok(a.into_dimensionality::<Ix4>()?)
}

fn read_npy_complex(path: &Path) -> Result<ArrayD<Complex32>> {
    match ndarray_npy::read_npy::<_, ArrayD<Complex32>>(path) {
        Ok(a) => Ok(a),
        Err(c64_err) => match ndarray_npy::read_npy::<_, ArrayD<Complex64>>(path) {
            Ok(a) => {
                debug!("narrowing complex128 data from {} to complex64", path.display());
                Ok(a.mapv(|v| Complex32::new(v.re as f32, v.im as f32)))
            }
            Err(_) => Err(c64_err.into()),
        },
    }
}

/// writes a complex array as a numpy `.npy` file
pub fn save_npy<S, D>(path: impl AsRef<Path>, array: &ArrayBase<S, D>) -> Result<()>
where
    S: Data<Elem = Complex32>,
    D: Dimension,
{
    ndarray_npy::write_npy(path, array)?;
    Ok(())
}

/// returns the (header, data) file pair for a cfl base name, accepting the base itself or either
/// of the two files
fn cfl_pair(path: &Path) -> (PathBuf, PathBuf) {
    let base = match path.extension().and_then(|e| e.to_str()) {
        Some("cfl") | Some("hdr") => path.with_extension(""),
        _ => path.to_path_buf(),
    };
    let with_suffix = |suffix: &str| {
        let mut s: OsString = base.as_os_str().to_owned();
        s.push(suffix);
        PathBuf::from(s)
    };
    (with_suffix(".hdr"), with_suffix(".cfl"))
}

/// reads a BART cfl/hdr pair. BART stores data in column-major order, so the dimensions are
/// reversed to obtain the equivalent row-major array, e.g. (x, y, z, coil) becomes
/// (coil, z, y, x). Trailing singleton BART dimensions are dropped.
pub fn read_cfl(path: impl AsRef<Path>) -> Result<ArrayD<Complex32>> {
    let (hdr, cfl) = cfl_pair(path.as_ref());
    let malformed = |reason: String| ReconError::Cfl { path: hdr.clone(), reason };

    let header = fs::read_to_string(&hdr)?;
    let dim_line = header
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or_else(|| malformed("no dimension line in header".to_string()))?;
    let mut dims = dim_line
        .split_whitespace()
        .map(|s| s.parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| malformed(e.to_string()))?;
    if dims.is_empty() {
        return Err(malformed("empty dimension line".to_string()));
    }

    let n_elems: usize = dims.iter().product();
    let bytes = fs::read(&cfl)?;
    if bytes.len() != n_elems * size_of::<Complex32>() {
        return Err(malformed(format!(
            "expected {} bytes of data for dims {:?}, found {}",
            n_elems * size_of::<Complex32>(),
            dims,
            bytes.len()
        )));
    }
    let mut floats = vec![0f32; 2 * n_elems];
    LittleEndian::read_f32_into(&bytes, &mut floats);
    let data = floats
        .chunks_exact(2)
        .map(|p| Complex32::new(p[0], p[1]))
        .collect::<Vec<_>>();

    while dims.len() > 1 && dims.last() == Some(&1) {
        dims.pop();
    }
    dims.reverse();
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data)?)
}

/// writes a row-major array as a BART cfl/hdr pair (dimensions reversed, see [read_cfl])
pub fn write_cfl<S, D>(path: impl AsRef<Path>, array: &ArrayBase<S, D>) -> Result<()>
where
    S: Data<Elem = Complex32>,
    D: Dimension,
{
    let (hdr, cfl) = cfl_pair(path.as_ref());
    let dims = array
        .shape()
        .iter()
        .rev()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    fs::write(&hdr, format!("# Dimensions\n{dims}\n"))?;

    let mut w = BufWriter::new(File::create(&cfl)?);
    for v in array.iter() {
        w.write_f32::<LittleEndian>(v.re)?;
        w.write_f32::<LittleEndian>(v.im)?;
    }
    w.flush()?;
    Ok(())
}
