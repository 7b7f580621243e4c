// Array utilities for centered k-space regions and boundary handling

use std::ops::Range;

/// returns the range of `width` samples centered on index n/2, clipped to the axis length. For
/// even widths the extra sample lands below the center, matching the fft-shifted DC location.
#[inline(always)]
pub fn centered_range(n: usize, width: usize) -> Range<usize> {
    let width = width.min(n);
    let start = (n / 2).saturating_sub(width / 2);
    let end = (start + width).min(n);
    start..end
}

/// maps a possibly out-of-bounds index onto [0, n) by half-sample symmetric reflection
/// (d c b a | a b c d | d c b a)
#[inline(always)]
pub fn reflect_index(index: isize, n: usize) -> usize {
    assert!(n > 0, "cannot reflect into an empty axis");
    let period = 2 * n as isize;
    let i = index.rem_euclid(period);
    if i < n as isize {
        i as usize
    } else {
        (period - 1 - i) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_range_is_clipped() {
        assert_eq!(centered_range(64, 20), 22..42);
        assert_eq!(centered_range(16, 20), 0..16);
        assert_eq!(centered_range(15, 4), 5..9);
        assert_eq!(centered_range(8, 0), 4..4);
    }

    #[test]
    fn reflect_index_mirrors_edges() {
        let n = 5;
        assert_eq!(reflect_index(-1, n), 0);
        assert_eq!(reflect_index(-3, n), 2);
        assert_eq!(reflect_index(5, n), 4);
        assert_eq!(reflect_index(7, n), 2);
        assert_eq!(reflect_index(2, n), 2);
        // repeated reflection for windows wider than the axis
        assert_eq!(reflect_index(-6, 2), 1);
    }
}
