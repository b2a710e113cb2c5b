//! Floating-point precision abstraction for the alignment engine.
//!
//! The engine is written once over [`Real`] and instantiated for the
//! precisions that are shipped (`f32` and `f64`). Small bookkeeping values
//! (shifts, least-squares systems, spline coefficients) are always kept in
//! `f64`; only the bulk frame and spectrum data use `T`.

use num_traits::Float;
use rustfft::FftNum;
use std::fmt::Display;
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Scalar type usable for frame data and FFTs.
///
/// Note that `abs` is provided by both `Float` and `Signed`; call sites use
/// `Float::abs` explicitly or convert to `f64` first.
pub trait Real:
    FftNum + Float + Default + Display + AddAssign + SubAssign + MulAssign + DivAssign + Sum
{
    /// Smallest meaningful magnitude used to guard divisions.
    const EPSILON: Self;

    /// Lossy conversion from `f64`.
    fn cast(value: f64) -> Self;

    /// Widening conversion to `f64`.
    fn as_f64(self) -> f64;

    /// Adds `src` element-wise into `dst` (lengths must match).
    fn accumulate(dst: &mut [Self], src: &[Self]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d += s;
        }
    }
}

impl Real for f32 {
    const EPSILON: Self = 1e-12;

    #[inline]
    fn cast(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        f64::from(self)
    }

    #[cfg(feature = "simd")]
    fn accumulate(dst: &mut [Self], src: &[Self]) {
        crate::util::simd::accumulate_f32(dst, src);
    }
}

impl Real for f64 {
    const EPSILON: Self = 1e-30;

    #[inline]
    fn cast(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }

    #[cfg(feature = "simd")]
    fn accumulate(dst: &mut [Self], src: &[Self]) {
        crate::util::simd::accumulate_f64(dst, src);
    }
}
