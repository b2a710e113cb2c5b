//! Peak search in centred correlation windows.

use crate::refine::refine_peak;
use crate::util::Real;

/// Sub-pixel displacement of the correlation peak in a square `size x size`
/// window whose centre element is zero shift.
///
/// Only displacements up to `max_displacement` (floored, per axis) from the
/// centre are considered. The search starts at the centre and scans the allowed region
/// row by row, replacing the candidate only on a strictly larger value, so a
/// flat window yields `(0, 0)`.
pub fn best_shift<T: Real>(
    window: &[T],
    size: usize,
    max_displacement: (f64, f64),
) -> (f64, f64) {
    let c = size / 2;
    let radius = |limit: f64| {
        if limit.is_finite() && limit > 0.0 {
            (limit.floor() as usize).min(c)
        } else {
            0
        }
    };
    let (rx, ry) = (radius(max_displacement.0), radius(max_displacement.1));
    let (mut bx, mut by) = (c, c);
    let mut best = window[c * size + c];
    for y in c - ry..=c + ry {
        let row = &window[y * size..(y + 1) * size];
        for x in c - rx..=c + rx {
            if row[x] > best {
                best = row[x];
                bx = x;
                by = y;
            }
        }
    }
    let (px, py) = refine_peak(window, size, size, bx, by);
    (px - c as f64, py - c as f64)
}
