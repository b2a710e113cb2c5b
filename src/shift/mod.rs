//! Shift estimation: peak search in correlation windows and the
//! least-squares system that makes pairwise shifts globally consistent.
//!
//! Shift convention: a frame with shift `s` shows the reference content
//! displaced by `s`, i.e. `frame(p) = reference(p - s)`. Resampling a frame
//! at `p + s` undoes the motion.

mod peak;
mod solver;

pub use peak::best_shift;
pub use solver::{compute_alignment, design_matrix, solve_shifts};

use crate::correlate::pairs;
use crate::trace::trace_debug;
use crate::util::Real;
use std::ops::{Add, Mul, Sub};

/// 2-D displacement in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Shift {
    pub x: f64,
    pub y: f64,
}

impl Shift {
    pub const ZERO: Shift = Shift { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both components rounded to the nearest integer.
    pub fn rounded(self) -> Self {
        Self::new(self.x.round(), self.y.round())
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }
}

impl Add for Shift {
    type Output = Shift;

    fn add(self, rhs: Shift) -> Shift {
        Shift::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Shift {
    type Output = Shift;

    fn sub(self, rhs: Shift) -> Shift {
        Shift::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Shift {
    type Output = Shift;

    fn mul(self, rhs: f64) -> Shift {
        Shift::new(self.x * rhs, self.y * rhs)
    }
}

/// Per-frame shifts relative to a reference frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignmentResult {
    ref_frame: usize,
    shifts: Vec<Shift>,
}

impl AlignmentResult {
    pub fn new(ref_frame: usize, shifts: Vec<Shift>) -> Self {
        Self { ref_frame, shifts }
    }

    pub fn ref_frame(&self) -> usize {
        self.ref_frame
    }

    /// One cumulative shift per frame.
    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }
}

/// Parameters for turning correlation windows into shifts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShiftContext {
    /// Frames in the stack.
    pub n: usize,
    /// Maximal expected shift at input resolution (pixels).
    pub max_shift: usize,
    /// Side of each correlation window.
    pub center_size: usize,
    /// Input pixels per correlation pixel, per axis.
    pub scale: (f64, f64),
    /// Frame the result is expressed against.
    pub ref_frame: Option<usize>,
    /// Outlier-rejection rounds of the solver.
    pub solver_iterations: usize,
}

/// Measures the pairwise shifts in `correlations` (laid out in [`pairs`]
/// order) and scales them to input resolution.
pub fn pairwise_shifts<T: Real>(correlations: &[T], ctx: &ShiftContext) -> (Vec<f64>, Vec<f64>) {
    let window = ctx.center_size * ctx.center_size;
    let max_displacement = (
        ctx.max_shift as f64 / ctx.scale.0,
        ctx.max_shift as f64 / ctx.scale.1,
    );
    pairs(ctx.n)
        .enumerate()
        .map(|(idx, (i, j))| {
            let corr = &correlations[idx * window..(idx + 1) * window];
            let (dx, dy) = best_shift(corr, ctx.center_size, max_displacement);
            let (sx, sy) = (dx * ctx.scale.0, dy * ctx.scale.1);
            trace_debug!("pair_shift", first = i, second = j, x = sx, y = sy);
            (sx, sy)
        })
        .unzip()
}

/// Solves the per-frame alignment from the correlation windows of all
/// frame pairs.
pub fn compute_shifts<T: Real>(correlations: &[T], ctx: &ShiftContext) -> AlignmentResult {
    let (bx, by) = pairwise_shifts(correlations, ctx);
    compute_alignment(
        &bx,
        &by,
        &design_matrix(ctx.n),
        ctx.ref_frame,
        ctx.n,
        ctx.solver_iterations,
    )
}
