//! Numeric helpers shared by size selection, correlation and spline code.

const BYTES_PER_MB: usize = 1024 * 1024;

/// Converts bytes to whole megabytes (rounded down).
pub(crate) fn mb(bytes: usize) -> usize {
    bytes / BYTES_PER_MB
}

/// Converts bytes to fractional megabytes.
pub(crate) fn mb_f64(bytes: usize) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

/// Side of the square correlation window able to hold shifts up to
/// `max_shift` in every direction.
pub fn center_size(max_shift: usize) -> usize {
    max_shift * 2 + 1
}

/// Signed frequency of bin `k` in a transform of length `n`.
#[inline]
pub(crate) fn signed_frequency(k: usize, n: usize) -> i64 {
    if k <= n / 2 {
        k as i64
    } else {
        k as i64 - n as i64
    }
}

/// Returns `true` if `n` factors into primes no larger than 7.
pub(crate) fn is_fft_friendly(n: usize) -> bool {
    if n == 0 {
        return false;
    }
    let mut rest = n;
    for p in [2usize, 3, 5, 7] {
        while rest % p == 0 {
            rest /= p;
        }
    }
    rest == 1
}

/// Relative cost model of a 1D transform of length `n`.
///
/// `n log2 n` weighted by the largest radix needed; powers of two are the
/// cheapest.
pub(crate) fn fft_cost(n: usize) -> f64 {
    if n < 2 {
        return 1.0;
    }
    let mut rest = n;
    let mut largest = 2usize;
    for p in [2usize, 3, 5, 7] {
        while rest % p == 0 {
            rest /= p;
            largest = largest.max(p);
        }
    }
    let penalty = match largest {
        2 => 1.0,
        3 => 1.1,
        5 => 1.2,
        7 => 1.3,
        _ => 2.0,
    };
    let nf = n as f64;
    nf * nf.log2() * penalty
}

/// Cubic B-spline basis function.
pub(crate) fn bspline03(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        2.0 / 3.0 - ax * ax + ax * ax * ax / 2.0
    } else if ax < 2.0 {
        let t = 2.0 - ax;
        t * t * t / 6.0
    } else {
        0.0
    }
}
