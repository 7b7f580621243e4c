// Forward and inverse MRI signal model
// transforms k-space to images and back with centered, orthonormal FFTs, and combines or
// spreads coil images through sensitivity maps

use crate::fftshift::{fftshift, ifftshift};
use ndarray::parallel::prelude::*;
use ndarray::{
    Array, Array3, Array4, ArrayBase, ArrayView2, ArrayView3, ArrayView4, Axis, Data, DataMut,
    Dimension, RemoveAxis, Zip,
};
use num_complex::Complex32;
use rustfft::FftPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelDirection {
    Forward,
    Inverse,
}

/// Centered FFT over the listed axes: ifftshift, unitary DFT, fftshift. The unitary scaling
/// keeps forward and inverse transforms exact adjoints of each other.
pub fn fftc_axes<S, D>(x: &mut ArrayBase<S, D>, axes: &[usize], direction: ModelDirection)
where
    S: DataMut<Elem = Complex32>,
    D: Dimension,
{
    ifftshift(x, axes);
    let mut planner = FftPlanner::<f32>::new();
    for &axis in axes {
        let n = x.len_of(Axis(axis));
        if n == 0 {
            continue;
        }
        let fft = match direction {
            ModelDirection::Forward => planner.plan_fft_forward(n),
            ModelDirection::Inverse => planner.plan_fft_inverse(n),
        };
        let scale = 1. / (n as f32).sqrt();
        Zip::from(x.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let mut buf: Vec<Complex32> = lane.iter().copied().collect();
            fft.process(&mut buf);
            lane.iter_mut().zip(buf).for_each(|(dst, src)| *dst = src * scale);
        });
    }
    fftshift(x, axes);
}

/// centered forward FFT over the three trailing spatial axes of (channels, z, y, x) data
pub fn fft3c(x: &Array4<Complex32>) -> Array4<Complex32> {
    let mut y = x.clone();
    fftc_axes(&mut y, &[1, 2, 3], ModelDirection::Forward);
    y
}

/// centered inverse FFT over the three trailing spatial axes of (channels, z, y, x) data
pub fn ifft3c(x: &Array4<Complex32>) -> Array4<Complex32> {
    let mut y = x.clone();
    fftc_axes(&mut y, &[1, 2, 3], ModelDirection::Inverse);
    y
}

/// root sum-of-squares coil combination along `axis`
pub fn sum_of_squares<S, D>(x: &ArrayBase<S, D>, axis: usize) -> Array<f32, D::Smaller>
where
    S: Data<Elem = Complex32>,
    D: RemoveAxis,
{
    x.map_axis(Axis(axis), |lane| {
        lane.iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt()
    })
}

/// SENSE forward operator for a single 2-D slice. Spreads a (maps, z, y) image over the coils of
/// a (maps, coils, z, y) sensitivity map and transforms to k-space. When a sampling mask is given,
/// un-sampled locations are zeroed.
pub fn sense_forward(
    image: ArrayView3<Complex32>,
    maps: ArrayView4<Complex32>,
    mask: Option<ArrayView2<bool>>,
) -> Array3<Complex32> {
    let (n_maps, n_coils, nz, ny) = maps.dim();
    let mut kspace = Array3::<Complex32>::zeros((n_coils, nz, ny));
    kspace.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(|(c, mut coil)| {
        for m in 0..n_maps {
            let s = maps.index_axis(Axis(0), m);
            let s = s.index_axis(Axis(0), c);
            Zip::from(&mut coil)
                .and(&s)
                .and(&image.index_axis(Axis(0), m))
                .for_each(|k, &s, &x| *k += s * x);
        }
    });
    fftc_axes(&mut kspace, &[1, 2], ModelDirection::Forward);
    if let Some(mask) = mask {
        apply_slice_mask(&mut kspace, mask);
    }
    kspace
}

/// SENSE adjoint operator for a single 2-D slice. Returns the (maps, z, y) image obtained by
/// inverse transforming (coils, z, y) k-space and combining with conjugate sensitivities.
pub fn sense_adjoint(
    kspace: ArrayView3<Complex32>,
    maps: ArrayView4<Complex32>,
    mask: Option<ArrayView2<bool>>,
) -> Array3<Complex32> {
    let (n_maps, n_coils, nz, ny) = maps.dim();
    let mut coil_images = kspace.to_owned();
    if let Some(mask) = mask {
        apply_slice_mask(&mut coil_images, mask);
    }
    fftc_axes(&mut coil_images, &[1, 2], ModelDirection::Inverse);

    let mut image = Array3::<Complex32>::zeros((n_maps, nz, ny));
    image.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(|(m, mut x)| {
        for c in 0..n_coils {
            let s = maps.index_axis(Axis(0), m);
            let s = s.index_axis(Axis(0), c);
            Zip::from(&mut x)
                .and(&s)
                .and(&coil_images.index_axis(Axis(0), c))
                .for_each(|x, &s, &k| *x += s.conj() * k);
        }
    });
    image
}

fn apply_slice_mask(kspace: &mut Array3<Complex32>, mask: ArrayView2<bool>) {
    for mut coil in kspace.axis_iter_mut(Axis(0)) {
        Zip::from(&mut coil).and(&mask).for_each(|k, &sampled| {
            if !sampled {
                *k = Complex32::ZERO;
            }
        });
    }
}
