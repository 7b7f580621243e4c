use ndarray::parallel::prelude::*;
use ndarray::{ArrayBase, Axis, DataMut, Dimension, Zip};

/// circularly shifts every lane along `axis` by `shift` samples. Positive shifts move samples
/// towards higher indices, matching numpy's roll convention.
pub fn circshift_axis<S, D, T>(x: &mut ArrayBase<S, D>, axis: usize, shift: isize)
where
    S: DataMut<Elem = T>,
    D: Dimension,
    T: Copy + Send + Sync,
{
    let n = x.len_of(Axis(axis));
    if n == 0 {
        return;
    }
    let k = shift.rem_euclid(n as isize) as usize;
    if k == 0 {
        return;
    }
    Zip::from(x.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
        let mut buf: Vec<T> = lane.iter().copied().collect();
        buf.rotate_right(k);
        lane.iter_mut().zip(buf).for_each(|(dst, src)| *dst = src);
    });
}

/// forward fft shift over the given axes (DC moves from index 0 to index n/2)
pub fn fftshift<S, D, T>(x: &mut ArrayBase<S, D>, axes: &[usize])
where
    S: DataMut<Elem = T>,
    D: Dimension,
    T: Copy + Send + Sync,
{
    for &axis in axes {
        let n = x.len_of(Axis(axis));
        circshift_axis(x, axis, (n / 2) as isize);
    }
}

/// inverse fft shift over the given axes (DC moves from index n/2 back to index 0)
pub fn ifftshift<S, D, T>(x: &mut ArrayBase<S, D>, axes: &[usize])
where
    S: DataMut<Elem = T>,
    D: Dimension,
    T: Copy + Send + Sync,
{
    for &axis in axes {
        let n = x.len_of(Axis(axis));
        circshift_axis(x, axis, -((n / 2) as isize));
    }
}
