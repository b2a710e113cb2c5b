//! Low-pass filter applied to downscaled spectra.

use crate::util::math::signed_frequency;
use crate::util::Real;

/// Highest normalized frequency the pass band may reach.
pub const MAX_CUTOFF: f64 = 0.45;
/// Width of the raised-cosine transition band (normalized frequency).
pub const TRANSITION_WIDTH: f64 = 0.02;

/// Cutoff (normalized frequency) for a correlation sampled at
/// `pixel_size` Å/px when details beyond `max_resolution` Å are noise.
pub fn cutoff_frequency(pixel_size: f64, max_resolution: f64) -> f64 {
    (pixel_size / max_resolution).min(MAX_CUTOFF)
}

/// Raised-cosine low-pass weights for the half spectrum of a
/// `width x height` frame, laid out like the spectrum itself.
pub fn low_pass_filter<T: Real>(width: usize, height: usize, cutoff: f64) -> Vec<T> {
    let fw = width / 2 + 1;
    let mut weights = Vec::with_capacity(fw * height);
    for y in 0..height {
        let fy = signed_frequency(y, height) as f64 / height as f64;
        for x in 0..fw {
            let fx = x as f64 / width as f64;
            let r = (fx * fx + fy * fy).sqrt();
            let w = if r <= cutoff {
                1.0
            } else if r >= cutoff + TRANSITION_WIDTH {
                0.0
            } else {
                0.5 * (1.0 + (std::f64::consts::PI * (r - cutoff) / TRANSITION_WIDTH).cos())
            };
            weights.push(T::cast(w));
        }
    }
    weights
}

/// Bytes of the largest filter any correlation of a `width x height` frame
/// could need (power-of-two padded plane).
pub fn max_filter_bytes<T>(width: usize, height: usize) -> usize {
    let x = width.next_power_of_two();
    let y = height.next_power_of_two();
    (x / 2 + 1) * y * std::mem::size_of::<T>()
}
