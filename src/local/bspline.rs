//! Cubic B-spline model of the shift field over space and time.
//!
//! The field is a tensor product of cubic B-splines over `(x, y, t)` with
//! `lx * ly * lt` control points. Knot spacing along an axis of extent
//! `size` is `size / (l - 1)` for three control points and `size / (l - 3)`
//! otherwise; control point `i` sits at knot `i - 1`, so one control point
//! lies outside the data on each side.

use super::FramePatchMeta;
use crate::settings::Dimensions;
use crate::shift::{solve_shifts, Shift};
use crate::util::math::bspline03;
use crate::util::{MovAlignError, MovAlignResult};
use nalgebra::{DMatrix, DVector};

/// Number of control points per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlPoints {
    pub x: usize,
    pub y: usize,
    pub t: usize,
}

impl ControlPoints {
    pub fn new(x: usize, y: usize, t: usize) -> Self {
        Self { x, y, t }
    }

    pub fn count(&self) -> usize {
        self.x * self.y * self.t
    }

    /// Flat coefficient index of control point `(cx, cy, ct)`.
    #[inline]
    pub fn index(&self, cx: usize, cy: usize, ct: usize) -> usize {
        (ct * self.y + cy) * self.x + cx
    }
}

impl Default for ControlPoints {
    fn default() -> Self {
        Self::new(6, 6, 5)
    }
}

fn knot_spacing(size: usize, points: usize) -> f64 {
    let divisor = if points == 3 { 2 } else { points.saturating_sub(3).max(1) };
    size as f64 / divisor as f64
}

/// Basis weights of every control point along one axis at coordinate `u`.
fn axis_weights(u: f64, spacing: f64, points: usize) -> Vec<f64> {
    let scaled = u / spacing;
    (0..points)
        .map(|i| bspline03(scaled - (i as f64 - 1.0)))
        .collect()
}

/// Fitted shift field: control grid plus coefficients for each component.
#[derive(Clone, Debug, PartialEq)]
pub struct BSplineGrid {
    control: ControlPoints,
    extent: Dimensions,
    coeffs_x: Vec<f64>,
    coeffs_y: Vec<f64>,
}

impl BSplineGrid {
    /// Wraps fitted coefficients for a movie of `extent` (`x`, `y`, frames
    /// in `n`).
    pub fn new(
        control: ControlPoints,
        extent: Dimensions,
        coeffs_x: Vec<f64>,
        coeffs_y: Vec<f64>,
    ) -> MovAlignResult<Self> {
        let count = control.count();
        if coeffs_x.len() != count || coeffs_y.len() != count {
            return Err(MovAlignError::BufferTooSmall {
                needed: count,
                got: coeffs_x.len().min(coeffs_y.len()),
            });
        }
        Ok(Self {
            control,
            extent,
            coeffs_x,
            coeffs_y,
        })
    }

    pub fn control(&self) -> ControlPoints {
        self.control
    }

    pub fn extent(&self) -> Dimensions {
        self.extent
    }

    pub fn coeffs_x(&self) -> &[f64] {
        &self.coeffs_x
    }

    pub fn coeffs_y(&self) -> &[f64] {
        &self.coeffs_y
    }

    fn spacings(&self) -> (f64, f64, f64) {
        (
            knot_spacing(self.extent.x(), self.control.x),
            knot_spacing(self.extent.y(), self.control.y),
            knot_spacing(self.extent.n(), self.control.t),
        )
    }

    /// Shift of pixel `(x, y)` in frame `t`.
    pub fn shift_at(&self, x: f64, y: f64, t: f64) -> Shift {
        let (hx, hy, ht) = self.spacings();
        let wx = axis_weights(x, hx, self.control.x);
        let wy = axis_weights(y, hy, self.control.y);
        let wt = axis_weights(t, ht, self.control.t);
        self.combine(&wx, &wy, &wt)
    }

    fn combine(&self, wx: &[f64], wy: &[f64], wt: &[f64]) -> Shift {
        let mut sx = 0.0;
        let mut sy = 0.0;
        for (ct, &bt) in wt.iter().enumerate() {
            if bt == 0.0 {
                continue;
            }
            for (cy, &by) in wy.iter().enumerate() {
                let byt = by * bt;
                if byt == 0.0 {
                    continue;
                }
                for (cx, &bx) in wx.iter().enumerate() {
                    let w = bx * byt;
                    let j = self.control.index(cx, cy, ct);
                    sx += w * self.coeffs_x[j];
                    sy += w * self.coeffs_y[j];
                }
            }
        }
        Shift::new(sx, sy)
    }

    /// Dense shift field of frame `t` for a `width x height` image covering
    /// the movie extent. `scale` holds the movie pixels per image pixel along
    /// x and y; shifts are returned in image pixels.
    pub fn displacement_field(
        &self,
        width: usize,
        height: usize,
        t: f64,
        scale: (f64, f64),
    ) -> Vec<Shift> {
        let (hx, hy, ht) = self.spacings();
        let (sx, sy) = scale;
        let wt = axis_weights(t, ht, self.control.t);
        let columns: Vec<Vec<f64>> = (0..width)
            .map(|x| axis_weights(x as f64 * sx, hx, self.control.x))
            .collect();
        let mut field = Vec::with_capacity(width * height);
        for y in 0..height {
            let wy = axis_weights(y as f64 * sy, hy, self.control.y);
            for wx in &columns {
                let s = self.combine(wx, &wy, &wt);
                field.push(Shift::new(s.x / sx, s.y / sy));
            }
        }
        field
    }
}

/// Fits a [`BSplineGrid`] through `(patch centre, frame, shift)` observations
/// with the outlier-rejecting least-squares solver.
///
/// Returns `None` when there are fewer observations than control points.
pub fn fit_bspline(
    extent: Dimensions,
    control: ControlPoints,
    observations: &[(FramePatchMeta, Shift)],
    iterations: usize,
) -> Option<BSplineGrid> {
    let cols = control.count();
    if cols == 0 || observations.len() < cols {
        return None;
    }
    let hx = knot_spacing(extent.x(), control.x);
    let hy = knot_spacing(extent.y(), control.y);
    let ht = knot_spacing(extent.n(), control.t);

    let mut a = DMatrix::zeros(observations.len(), cols);
    let mut bx = DVector::zeros(observations.len());
    let mut by = DVector::zeros(observations.len());
    for (row, (meta, shift)) in observations.iter().enumerate() {
        let (cx, cy) = meta.rect.center();
        let wx = axis_weights(cx, hx, control.x);
        let wy = axis_weights(cy, hy, control.y);
        let wt = axis_weights(meta.id_t as f64, ht, control.t);
        for (it, &bt) in wt.iter().enumerate() {
            for (iy, &b_y) in wy.iter().enumerate() {
                for (ix, &b_x) in wx.iter().enumerate() {
                    a[(row, control.index(ix, iy, it))] = b_x * b_y * bt;
                }
            }
        }
        bx[row] = shift.x;
        by[row] = shift.y;
    }
    let (coeffs_x, coeffs_y) = solve_shifts(&a, &bx, &by, iterations);
    BSplineGrid::new(
        control,
        extent,
        coeffs_x.iter().copied().collect(),
        coeffs_y.iter().copied().collect(),
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::{fit_bspline, knot_spacing, BSplineGrid, ControlPoints};
    use crate::local::{FramePatchMeta, PatchRect};
    use crate::settings::Dimensions;
    use crate::shift::Shift;

    fn observations(
        field: impl Fn(f64, f64, f64) -> Shift,
        frames: usize,
    ) -> Vec<(FramePatchMeta, Shift)> {
        let mut obs = Vec::new();
        for py in 0..5usize {
            for px in 0..5usize {
                for t in 0..frames {
                    let meta = FramePatchMeta {
                        rect: PatchRect {
                            x0: px * 24,
                            y0: py * 24,
                            x1: px * 24 + 31,
                            y1: py * 24 + 31,
                        },
                        id_x: px,
                        id_y: py,
                        id_t: t,
                    };
                    let (cx, cy) = meta.rect.center();
                    obs.push((meta, field(cx, cy, t as f64)));
                }
            }
        }
        obs
    }

    #[test]
    fn knot_spacing_rules() {
        assert_eq!(knot_spacing(100, 3), 50.0);
        assert_eq!(knot_spacing(100, 5), 50.0);
        assert_eq!(knot_spacing(120, 6), 40.0);
    }

    #[test]
    fn smooth_field_is_reproduced() {
        let extent = Dimensions::frames(128, 128, 6).unwrap();
        let field = |x: f64, y: f64, t: f64| {
            Shift::new(0.01 * x + 0.2 * t - 1.0, -0.005 * y + 0.001 * x * t)
        };
        let obs = observations(field, 6);
        let grid = fit_bspline(extent, ControlPoints::new(4, 4, 4), &obs, 20).unwrap();
        for (x, y, t) in [(20.0, 30.0, 1.0), (64.0, 64.0, 3.0), (100.0, 90.0, 5.0)] {
            let got = grid.shift_at(x, y, t);
            let want = field(x, y, t);
            assert!((got.x - want.x).abs() < 1e-6, "{got:?} vs {want:?}");
            assert!((got.y - want.y).abs() < 1e-6, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn too_few_observations_give_no_model() {
        let extent = Dimensions::frames(128, 128, 2).unwrap();
        let obs = observations(|_, _, _| Shift::ZERO, 2);
        assert!(fit_bspline(extent, ControlPoints::new(6, 6, 5), &obs, 20).is_none());
    }

    #[test]
    fn dense_field_matches_pointwise_evaluation() {
        let control = ControlPoints::new(4, 4, 3);
        let coeffs: Vec<f64> = (0..control.count()).map(|i| (i % 7) as f64 * 0.1).collect();
        let grid = BSplineGrid::new(
            control,
            Dimensions::frames(16, 8, 4).unwrap(),
            coeffs.clone(),
            coeffs.iter().map(|c| -c).collect(),
        )
        .unwrap();
        let field = grid.displacement_field(8, 4, 2.0, (2.0, 2.0));
        assert_eq!(field.len(), 32);
        let direct = grid.shift_at(6.0, 4.0, 2.0);
        let dense = field[2 * 8 + 3];
        assert!((dense.x - direct.x / 2.0).abs() < 1e-12);
        assert!((dense.y + direct.x / 2.0).abs() < 1e-12);
    }

    #[test]
    fn anisotropic_scale_maps_each_axis_separately() {
        let control = ControlPoints::new(4, 4, 3);
        let coeffs: Vec<f64> = (0..control.count()).map(|i| (i % 5) as f64 * 0.2).collect();
        let grid = BSplineGrid::new(
            control,
            Dimensions::frames(16, 12, 4).unwrap(),
            coeffs.clone(),
            coeffs.iter().map(|c| c + 1.0).collect(),
        )
        .unwrap();
        // 16 x 12 movie shown as 8 x 4: x halves, y shrinks by three.
        let field = grid.displacement_field(8, 4, 1.0, (2.0, 3.0));
        let direct = grid.shift_at(10.0, 6.0, 1.0);
        let dense = field[2 * 8 + 5];
        assert!((dense.x - direct.x / 2.0).abs() < 1e-12);
        assert!((dense.y - direct.y / 3.0).abs() < 1e-12);
    }
}
