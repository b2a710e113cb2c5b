//! Sub-pixel peak refinement on a 2-D grid.

use crate::refine::quad1d::parabolic_offset;
use crate::util::Real;

/// Refines an integer peak at `(x, y)` of a `width x height` row-major grid.
///
/// Each axis is refined independently from the row and column through the
/// peak. An axis whose neighbours fall outside the grid, or whose samples do
/// not form a concave parabola, keeps its integer coordinate.
pub fn refine_peak<T: Real>(
    values: &[T],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
) -> (f64, f64) {
    let at = |cx: usize, cy: usize| values[cy * width + cx].as_f64();
    let mid = at(x, y);
    let dx = if x > 0 && x + 1 < width {
        parabolic_offset(at(x - 1, y), mid, at(x + 1, y)).unwrap_or(0.0)
    } else {
        0.0
    };
    let dy = if y > 0 && y + 1 < height {
        parabolic_offset(at(x, y - 1), mid, at(x, y + 1)).unwrap_or(0.0)
    } else {
        0.0
    };
    (x as f64 + dx, y as f64 + dy)
}
